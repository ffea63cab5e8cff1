//! Reachability and latency probe for a managed PostgreSQL endpoint.
//!
//! A run resolves its SQL and credentials once, then repeatedly opens a
//! session, times the connect and the query, and emits one [`ProbeRecord`]
//! per cycle. Per-cycle failures are recorded, never propagated; only
//! resolution failures before the first cycle end a run.

pub mod config;
pub mod credentials;
pub mod csv_extract;
pub mod database;
pub mod invocation;
pub mod logging;
pub mod object_store;
pub mod probe;
pub mod probe_loop;
pub mod query_source;
pub mod report;
pub mod secret_store;

pub use config::{ConfigError, ObjectStoreLocation, ProbeConfig, WarmingSettings};
pub use credentials::{CredentialError, CredentialProvider, Credentials};
pub use csv_extract::{CandidateQuery, ColumnMatcher, CsvQueryExtractor, SubstringMatcher};
pub use database::{ConnectParams, DatabaseConnection, DatabaseDriver, DbError, ResultSet};
pub use invocation::{InvocationResponse, WarmingEvent, WarmingHandler};
pub use probe::{
    ConnectionProbe, CycleError, CycleErrorKind, ProbeRecord, ResultSummary, WarmingReport,
    Workload,
};
pub use probe_loop::{LoopExit, LoopSummary, ProbeLoop, ProbeWindow};
pub use query_source::{ObjectStoreQuerySource, QuerySourceError};
pub use report::{ConsoleSink, OutputFormat, RecordSink};
