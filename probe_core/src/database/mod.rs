//! Seam between the probe and the database client.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProbeConfig;
use crate::credentials::{Credentials, PASSWORD_MASK};
use crate::probe::CycleErrorKind;

pub mod postgres;

pub use postgres::PgDriver;

#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    password: String,
    pub connect_timeout: Duration,
}

impl ConnectParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        credentials: &Credentials,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: credentials.username.clone(),
            password: credentials.password().to_string(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &ProbeConfig, credentials: &Credentials) -> Self {
        Self::new(
            &config.endpoint,
            config.port,
            &config.database,
            credentials,
            config.connect_timeout,
        )
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &PASSWORD_MASK)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Rows rendered as text, as the simple query protocol returns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub rows_affected: Option<u64>,
}

impl ResultSet {
    /// First column of the first row; `Some(None)` for a SQL NULL.
    pub fn first_cell(&self) -> Option<Option<&str>> {
        let cell = self.rows.first()?.first()?;
        Some(cell.as_deref())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("{0}")]
    Query(String),
    #[error("{0}")]
    Unexpected(String),
}

impl DbError {
    pub fn kind(&self) -> CycleErrorKind {
        match self {
            DbError::Connect(_) | DbError::ConnectTimeout(_) | DbError::ConnectionLost(_) => {
                CycleErrorKind::Connection
            }
            DbError::Query(_) => CycleErrorKind::Query,
            DbError::Unexpected(_) => CycleErrorKind::Unexpected,
        }
    }
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn connect(&self, params: &ConnectParams)
    -> Result<Box<dyn DatabaseConnection>, DbError>;
}

#[async_trait]
impl<T: DatabaseDriver + ?Sized> DatabaseDriver for &T {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<Box<dyn DatabaseConnection>, DbError> {
        (**self).connect(params).await
    }
}

#[async_trait]
pub trait DatabaseConnection: Send {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DbError>;

    /// Ends the session. Called exactly once, on every exit path of a cycle.
    async fn close(self: Box<Self>);
}
