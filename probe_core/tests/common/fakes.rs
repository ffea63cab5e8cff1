use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use probe_core::database::{ConnectParams, DatabaseConnection, DatabaseDriver, DbError, ResultSet};
use probe_core::object_store::{ObjectStore, ObjectStoreError, ObjectSummary};
use probe_core::probe::SERVER_ADDR_QUERY;
use probe_core::secret_store::{SecretStore, SecretStoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const FAKE_SERVER_ADDR: &str = "10.0.0.5";

pub fn single_value(column: &str, value: &str) -> ResultSet {
    ResultSet {
        columns: vec![column.to_string()],
        rows: vec![vec![Some(value.to_string())]],
        rows_affected: Some(1),
    }
}

#[derive(Default)]
struct DriverState {
    connect_delay: Duration,
    query_delay: Duration,
    hang_on_connect: bool,
    failing_connects: usize,
    connect_error: Option<DbError>,
    failing_statements: HashMap<String, DbError>,
    responses: HashMap<String, ResultSet>,
    connects: Vec<Instant>,
    closes: usize,
    executed: Vec<String>,
}

impl DriverState {
    fn next_connect_failure(&mut self) -> Option<DbError> {
        if self.failing_connects == 0 {
            return None;
        }
        self.failing_connects -= 1;
        self.connect_error.clone()
    }

    fn answer(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        self.executed.push(sql.to_string());
        if let Some(err) = self.failing_statements.get(sql) {
            return Err(err.clone());
        }
        if let Some(result) = self.responses.get(sql) {
            return Ok(result.clone());
        }
        if sql == SERVER_ADDR_QUERY {
            return Ok(single_value("inet_server_addr", FAKE_SERVER_ADDR));
        }
        Ok(single_value("?column?", "1"))
    }
}

/// Scriptable driver; clones share state so a test can inspect what a probe
/// did after handing it a copy.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<DriverState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().connect_delay = delay;
        self
    }

    pub fn with_query_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().query_delay = delay;
        self
    }

    pub fn hanging_on_connect(self) -> Self {
        self.state.lock().unwrap().hang_on_connect = true;
        self
    }

    /// The next `attempts` connects fail with `error`.
    pub fn failing_connects(self, attempts: usize, error: DbError) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.failing_connects = attempts;
            state.connect_error = Some(error);
        }
        self
    }

    pub fn failing_statement(self, sql: &str, error: DbError) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_statements
            .insert(sql.to_string(), error);
        self
    }

    pub fn responding(self, sql: &str, result: ResultSet) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(sql.to_string(), result);
        self
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }
}

#[async_trait]
impl DatabaseDriver for FakeDriver {
    async fn connect(
        &self,
        _params: &ConnectParams,
    ) -> Result<Box<dyn DatabaseConnection>, DbError> {
        let (delay, hang, failure) = {
            let mut state = self.state.lock().unwrap();
            state.connects.push(Instant::now());
            (
                state.connect_delay,
                state.hang_on_connect,
                state.next_connect_failure(),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(delay).await;
        match failure {
            Some(err) => Err(err),
            None => Ok(Box::new(FakeConnection {
                state: Arc::clone(&self.state),
            })),
        }
    }
}

struct FakeConnection {
    state: Arc<Mutex<DriverState>>,
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        let delay = self.state.lock().unwrap().query_delay;
        tokio::time::sleep(delay).await;
        self.state.lock().unwrap().answer(sql)
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().closes += 1;
    }
}

pub fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
}

#[derive(Clone, Default)]
pub struct FakeObjectStore {
    objects: Arc<Mutex<Vec<(ObjectSummary, Vec<u8>)>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, last_modified: DateTime<Utc>, body: &str) -> Self {
        self.objects.lock().unwrap().push((
            ObjectSummary {
                key: key.to_string(),
                last_modified,
            },
            body.as_bytes().to_vec(),
        ));
        self
    }

    pub fn fetched_keys(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list(
        &self,
        _bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(summary, _)| summary.key.starts_with(prefix))
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn get(&self, _bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.fetched.lock().unwrap().push(key.to_string());
        let objects = self.objects.lock().unwrap();
        let (_, body) = objects
            .iter()
            .find(|(summary, _)| summary.key == key)
            .unwrap_or_else(|| panic!("fake object store has no key {key}"));
        Ok(body.clone())
    }
}

#[derive(Clone, Default)]
pub struct FakeSecretStore {
    secrets: HashMap<String, String>,
}

impl FakeSecretStore {
    pub fn with_secret(mut self, secret_id: &str, payload: &str) -> Self {
        self.secrets
            .insert(secret_id.to_string(), payload.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretStoreError> {
        self.secrets
            .get(secret_id)
            .cloned()
            .ok_or_else(|| SecretStoreError::MissingSecretString(secret_id.to_string()))
    }
}

pub fn test_params() -> ConnectParams {
    let credentials = probe_core::Credentials::new("probe", "hunter2");
    ConnectParams::new(
        "db.example.internal",
        5432,
        "postgres",
        &credentials,
        probe_core::config::DEFAULT_CONNECT_TIMEOUT,
    )
}

#[derive(Default)]
pub struct CollectingSink {
    pub records: Vec<probe_core::ProbeRecord>,
}

impl probe_core::RecordSink for CollectingSink {
    fn emit(&mut self, record: &probe_core::ProbeRecord) -> std::io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
