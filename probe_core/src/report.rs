//! Record output: console lines, JSON lines, CSV result files and run
//! statistics.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::probe::ProbeRecord;
use crate::probe_loop::{LoopExit, LoopSummary};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives each record as soon as its cycle ends.
pub trait RecordSink {
    fn emit(&mut self, record: &ProbeRecord) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub struct ConsoleSink<W> {
    writer: W,
    format: OutputFormat,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for ConsoleSink<W> {
    fn emit(&mut self, record: &ProbeRecord) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.writer, "{}", format_record_line(record))?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.writer, record)?;
                writeln!(self.writer)?;
            }
        }
        self.writer.flush()
    }
}

/// One human-readable line per record.
pub fn format_record_line(record: &ProbeRecord) -> String {
    let mut line = format!("[{}] ", record.timestamp.format(TIMESTAMP_FORMAT));
    if let Some(addr) = &record.server_addr {
        line.push_str(&format!("Instance: {addr} | "));
    }
    line.push_str(&format!("Connect: {:.3}s", record.connect_ms / 1000.0));
    if let Some(query_ms) = record.query_ms {
        line.push_str(&format!(" | Query: {:.3}s", query_ms / 1000.0));
    }
    match (&record.error, &record.result_summary) {
        (Some(error), _) => line.push_str(&format!(" | {error}")),
        (None, Some(summary)) => line.push_str(&format!(" | Result: {summary}")),
        (None, None) => {}
    }
    line
}

/// Appends every record as a CSV row under a fixed header.
pub struct CsvResultSink<W> {
    writer: W,
}

impl CsvResultSink<fs::File> {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::new(fs::File::create(path)?)
    }
}

impl<W: Write> CsvResultSink<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writeln!(writer, "timestamp,connect_s,query_s,server_addr,result,error")?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for CsvResultSink<W> {
    fn emit(&mut self, record: &ProbeRecord) -> io::Result<()> {
        writeln!(
            self.writer,
            "{},{:.6},{},{},{},{}",
            record.timestamp.to_rfc3339(),
            record.connect_ms / 1000.0,
            record
                .query_ms
                .map(|ms| format!("{:.6}", ms / 1000.0))
                .unwrap_or_default(),
            csv_field(record.server_addr.as_deref().unwrap_or_default()),
            csv_field(
                &record
                    .result_summary
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
            csv_field(
                &record
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Forwards each record to every inner sink; all of them see the record even
/// if an earlier one fails.
#[derive(Default)]
pub struct FanOutSink {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl FanOutSink {
    pub fn push(&mut self, sink: impl RecordSink + 'static) {
        self.sinks.push(Box::new(sink));
    }
}

impl RecordSink for FanOutSink {
    fn emit(&mut self, record: &ProbeRecord) -> io::Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.emit(record) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        Some(Self {
            median,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}

pub fn write_summary(summary: &LoopSummary, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nSummary:")?;
    let ended = match summary.exit {
        LoopExit::WindowElapsed => "test window elapsed",
        LoopExit::Cancelled => "cancelled",
    };
    writeln!(
        out,
        "  Cycles: {}  succeeded={}  connection_errors={}  query_errors={}  unexpected_errors={}  ({ended})",
        summary.cycles,
        summary.succeeded,
        summary.connection_errors,
        summary.query_errors,
        summary.unexpected_errors,
    )?;
    for (label, stats) in [("Connect", summary.connect), ("Query", summary.query)] {
        if let Some(stats) = stats {
            writeln!(
                out,
                "  {label}: median={:.3}s  min={:.3}s  max={:.3}s",
                stats.median / 1000.0,
                stats.min / 1000.0,
                stats.max / 1000.0
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{CycleError, CycleErrorKind, ResultSummary};
    use chrono::{Local, TimeZone};

    fn record() -> ProbeRecord {
        ProbeRecord {
            timestamp: Local.with_ymd_and_hms(2025, 3, 4, 10, 20, 30).unwrap(),
            connect_ms: 12.0,
            query_ms: Some(340.6),
            server_addr: Some("10.0.1.17".into()),
            result_summary: Some(ResultSummary::Value {
                value: "8126464".into(),
            }),
            error: None,
        }
    }

    #[test]
    fn should_format_successful_record() {
        assert_eq!(
            format_record_line(&record()),
            "[2025-03-04 10:20:30] Instance: 10.0.1.17 | Connect: 0.012s | Query: 0.341s | Result: 8126464"
        );
    }

    #[test]
    fn should_format_failed_record_with_error_in_place_of_result() {
        let failed = ProbeRecord {
            query_ms: None,
            server_addr: None,
            result_summary: None,
            error: Some(CycleError {
                kind: CycleErrorKind::Connection,
                message: "connect timed out after 5s".into(),
            }),
            connect_ms: 5000.0,
            ..record()
        };

        assert_eq!(
            format_record_line(&failed),
            "[2025-03-04 10:20:30] Connect: 5.000s | Connection failed: connect timed out after 5s"
        );
    }

    #[test]
    fn should_write_json_lines() {
        let mut sink = ConsoleSink::new(Vec::new(), OutputFormat::Json);

        sink.emit(&record()).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value["server_addr"], "10.0.1.17");
        assert_eq!(value["result_summary"]["type"], "value");
        assert!(value["error"].is_null());
    }

    #[test]
    fn should_quote_csv_fields_with_separators() {
        let mut sink = CsvResultSink::new(Vec::new()).unwrap();
        let failed = ProbeRecord {
            result_summary: None,
            error: Some(CycleError {
                kind: CycleErrorKind::Query,
                message: "relation \"t\" does not exist, sorry".into(),
            }),
            ..record()
        };

        sink.emit(&failed).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let row = output.lines().nth(1).unwrap();
        assert!(row.ends_with(",10.0.1.17,,\"Query failed: relation \"\"t\"\" does not exist, sorry\""));
    }

    #[test]
    fn should_compute_median_min_max() {
        let stats = LatencyStats::from_samples(&[4.0, 1.0, 3.0, 2.0]).unwrap();

        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(LatencyStats::from_samples(&[7.0]).unwrap().median, 7.0);
        assert!(LatencyStats::from_samples(&[]).is_none());
    }
}
