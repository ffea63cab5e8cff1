//! One connect, execute, release cycle against the endpoint.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::database::{ConnectParams, DatabaseConnection, DatabaseDriver, DbError};

/// Untimed follow-up that identifies the instance behind the endpoint.
pub const SERVER_ADDR_QUERY: &str = "SELECT inet_server_addr()::text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleErrorKind {
    Connection,
    Query,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleError {
    pub kind: CycleErrorKind,
    pub message: String,
}

impl From<DbError> for CycleError {
    fn from(err: DbError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CycleErrorKind::Connection => write!(f, "Connection failed: {}", self.message),
            CycleErrorKind::Query => write!(f, "Query failed: {}", self.message),
            CycleErrorKind::Unexpected => write!(f, "Unexpected error: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultSummary {
    /// First column of the first row, `NULL` for a SQL null.
    Value { value: String },
    RowCount { rows: usize },
    Warmed { succeeded: usize, total: usize },
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSummary::Value { value } => f.write_str(value),
            ResultSummary::RowCount { rows } => write!(f, "{rows} rows"),
            ResultSummary::Warmed { succeeded, total } => {
                write!(f, "{succeeded}/{total} queries succeeded")
            }
        }
    }
}

/// Outcome of one cycle. Built once the cycle has released its connection.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRecord {
    pub timestamp: DateTime<Local>,
    pub connect_ms: f64,
    pub query_ms: Option<f64>,
    pub server_addr: Option<String>,
    pub result_summary: Option<ResultSummary>,
    pub error: Option<CycleError>,
}

impl ProbeRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What a cycle executes once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    Single(String),
    /// Every statement runs in order; individual failures are counted, not raised.
    Bulk(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmingReport {
    pub succeeded: usize,
    pub total: usize,
    pub connect_ms: f64,
    pub elapsed: Duration,
}

pub struct ConnectionProbe<D> {
    driver: D,
    params: ConnectParams,
}

impl<D: DatabaseDriver> ConnectionProbe<D> {
    pub fn new(driver: D, params: ConnectParams) -> Self {
        Self { driver, params }
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Runs one full cycle. Never fails: connect and query errors end up in
    /// the returned record.
    pub async fn run_cycle(&self, workload: &Workload) -> ProbeRecord {
        let timestamp = Local::now();

        let (connection, connect_ms) = self.connect().await;
        let mut connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                let error = CycleError::from(e);
                log_cycle_error(&error);
                return ProbeRecord {
                    timestamp,
                    connect_ms,
                    query_ms: None,
                    server_addr: None,
                    result_summary: None,
                    error: Some(error),
                };
            }
        };

        let query_started = Instant::now();
        let outcome = match workload {
            Workload::Single(sql) => run_single(connection.as_mut(), sql).await,
            Workload::Bulk(statements) => {
                let succeeded = run_statements(connection.as_mut(), statements).await;
                Ok(ResultSummary::Warmed {
                    succeeded,
                    total: statements.len(),
                })
            }
        };
        let query_ms = millis(query_started.elapsed());

        let server_addr = match (workload, &outcome) {
            (Workload::Single(_), Ok(_)) => server_addr(connection.as_mut()).await,
            _ => None,
        };
        connection.close().await;

        let (result_summary, error) = match outcome {
            Ok(summary) => (Some(summary), None),
            Err(e) => {
                let error = CycleError::from(e);
                log_cycle_error(&error);
                (None, Some(error))
            }
        };

        ProbeRecord {
            timestamp,
            connect_ms,
            query_ms: Some(query_ms),
            server_addr,
            result_summary,
            error,
        }
    }

    /// Single pass over `statements` on one connection. Only a failure to
    /// connect is an error.
    pub async fn warm(&self, statements: &[String]) -> Result<WarmingReport, DbError> {
        let started = Instant::now();
        tracing::info!("Warming started: {} queries", statements.len());

        let (connection, connect_ms) = self.connect().await;
        let mut connection = connection?;
        let succeeded = run_statements(connection.as_mut(), statements).await;
        connection.close().await;

        let elapsed = started.elapsed();
        tracing::info!(
            "Warming finished: {succeeded}/{} queries succeeded in {:.2}s",
            statements.len(),
            elapsed.as_secs_f64()
        );
        Ok(WarmingReport {
            succeeded,
            total: statements.len(),
            connect_ms,
            elapsed,
        })
    }

    async fn connect(&self) -> (Result<Box<dyn DatabaseConnection>, DbError>, f64) {
        let started = Instant::now();
        let timeout = self.params.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.driver.connect(&self.params)).await
        {
            Ok(result) => result,
            Err(_) => Err(DbError::ConnectTimeout(timeout)),
        };
        (result, millis(started.elapsed()))
    }
}

async fn run_single(
    connection: &mut dyn DatabaseConnection,
    sql: &str,
) -> Result<ResultSummary, DbError> {
    let result = connection.query(sql).await?;
    Ok(match result.first_cell() {
        Some(cell) => ResultSummary::Value {
            value: cell.unwrap_or("NULL").to_string(),
        },
        None => ResultSummary::RowCount {
            rows: result.rows.len(),
        },
    })
}

async fn run_statements(connection: &mut dyn DatabaseConnection, statements: &[String]) -> usize {
    let total = statements.len();
    let mut succeeded = 0;
    for (i, sql) in statements.iter().enumerate() {
        let started = Instant::now();
        match connection.query(sql).await {
            Ok(_) => {
                succeeded += 1;
                tracing::info!(
                    "Query {}/{total} succeeded in {:.2}s",
                    i + 1,
                    started.elapsed().as_secs_f64()
                );
            }
            Err(e) => tracing::warn!("Query {}/{total} failed: {e}", i + 1),
        }
    }
    succeeded
}

async fn server_addr(connection: &mut dyn DatabaseConnection) -> Option<String> {
    match connection.query(SERVER_ADDR_QUERY).await {
        Ok(result) => result.first_cell().flatten().map(str::to_string),
        Err(e) => {
            tracing::debug!(error = %e, "Could not read server address");
            None
        }
    }
}

fn log_cycle_error(error: &CycleError) {
    match error.kind {
        CycleErrorKind::Unexpected => tracing::error!(kind = ?error.kind, "{error}"),
        _ => tracing::warn!(kind = ?error.kind, "{error}"),
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
