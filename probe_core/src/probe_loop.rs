//! Repeats probe cycles across a fixed wall-clock window, or runs one
//! warming pass.

use snafu::{Location, ResultExt, Snafu};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_DURATION_SECS;
use crate::database::{DatabaseDriver, DbError};
use crate::probe::{ConnectionProbe, CycleErrorKind, ProbeRecord, WarmingReport, Workload};
use crate::report::{LatencyStats, RecordSink};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WarmingError {
    #[snafu(display("Failed to connect to {endpoint}: {source}"))]
    WarmingConnect {
        endpoint: String,
        source: DbError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// `[start, end)` fixed when the loop starts. Durations longer than the
/// configurable maximum are clamped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWindow {
    pub start: Instant,
    pub end: Instant,
}

impl ProbeWindow {
    pub fn starting_now(duration: Duration) -> Self {
        let start = Instant::now();
        let limit = Duration::from_secs(MAX_DURATION_SECS);
        if duration > limit {
            tracing::warn!("Test duration {duration:?} clamped to {limit:?}");
        }
        Self {
            start,
            end: start + duration.min(limit),
        }
    }

    pub fn is_open(&self) -> bool {
        Instant::now() < self.end
    }

    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    WindowElapsed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    pub cycles: usize,
    pub succeeded: usize,
    pub connection_errors: usize,
    pub query_errors: usize,
    pub unexpected_errors: usize,
    pub connect: Option<LatencyStats>,
    pub query: Option<LatencyStats>,
    pub exit: LoopExit,
}

#[derive(Default)]
struct Tally {
    cycles: usize,
    succeeded: usize,
    connection_errors: usize,
    query_errors: usize,
    unexpected_errors: usize,
    connect_ms: Vec<f64>,
    query_ms: Vec<f64>,
}

impl Tally {
    fn observe(&mut self, record: &ProbeRecord) {
        self.cycles += 1;
        match &record.error {
            None => {
                self.succeeded += 1;
                self.connect_ms.push(record.connect_ms);
                self.query_ms.extend(record.query_ms);
            }
            Some(error) => match error.kind {
                CycleErrorKind::Connection => self.connection_errors += 1,
                CycleErrorKind::Query => self.query_errors += 1,
                CycleErrorKind::Unexpected => self.unexpected_errors += 1,
            },
        }
    }

    fn finish(self, exit: LoopExit) -> LoopSummary {
        LoopSummary {
            cycles: self.cycles,
            succeeded: self.succeeded,
            connection_errors: self.connection_errors,
            query_errors: self.query_errors,
            unexpected_errors: self.unexpected_errors,
            connect: LatencyStats::from_samples(&self.connect_ms),
            query: LatencyStats::from_samples(&self.query_ms),
            exit,
        }
    }
}

pub struct ProbeLoop<D> {
    probe: ConnectionProbe<D>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<D: DatabaseDriver> ProbeLoop<D> {
    pub fn new(probe: ConnectionProbe<D>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Starts cycles until `duration` has elapsed, pausing `interval` between
    /// them. A cycle in flight when the window closes is allowed to finish; no
    /// cycle starts after it.
    pub async fn run_windowed(
        &self,
        workload: &Workload,
        duration: Duration,
        sink: &mut dyn RecordSink,
    ) -> LoopSummary {
        let window = ProbeWindow::starting_now(duration);
        let mut tally = Tally::default();
        tracing::info!(
            "Probing {}:{} for {:?} every {:?}",
            self.probe.params().host,
            self.probe.params().port,
            duration,
            self.interval
        );

        let exit = loop {
            if !window.is_open() {
                break LoopExit::WindowElapsed;
            }
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let record = self.probe.run_cycle(workload).await;
            tally.observe(&record);
            if let Err(e) = sink.emit(&record) {
                tracing::warn!(error = %e, "Failed to emit probe record");
            }

            let pause = self.interval.min(window.remaining());
            tokio::select! {
                _ = self.cancel.cancelled() => break LoopExit::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        };

        let summary = tally.finish(exit);
        tracing::info!(
            cycles = summary.cycles,
            succeeded = summary.succeeded,
            exit = ?summary.exit,
            "Probe run finished"
        );
        summary
    }

    /// Executes `statements` once over a single connection and stops.
    pub async fn run_single_pass(
        &self,
        statements: &[String],
    ) -> Result<WarmingReport, WarmingError> {
        self.probe
            .warm(statements)
            .await
            .context(WarmingConnectSnafu {
                endpoint: self.probe.params().host.as_str(),
            })
    }
}
