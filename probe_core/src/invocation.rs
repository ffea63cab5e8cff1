//! Event-driven warming: one invocation resolves credentials and the newest
//! query export, then runs every statement once against the given endpoint.

use serde::{Deserialize, Serialize};
use snafu::{Location, ResultExt, Snafu};
use std::time::{Duration, Instant};

use crate::config::{DEFAULT_CONNECT_TIMEOUT, WarmingSettings};
use crate::credentials::{CredentialError, CredentialProvider};
use crate::database::{ConnectParams, DatabaseDriver};
use crate::object_store::ObjectStore;
use crate::probe::{ConnectionProbe, WarmingReport};
use crate::probe_loop::{ProbeLoop, WarmingError};
use crate::query_source::{ObjectStoreQuerySource, QuerySourceError};

#[derive(Debug, Snafu)]
pub enum InvocationError {
    #[snafu(display("{source}"))]
    Credentials {
        source: CredentialError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{source}"))]
    Queries {
        source: QuerySourceError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{source}"))]
    Warming {
        source: WarmingError,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingEvent {
    #[serde(rename = "Payload", default)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "Address", default)]
    pub address: Option<String>,
}

impl WarmingEvent {
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            payload: EventPayload {
                address: Some(address.into()),
            },
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.payload
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
    #[serde(rename = "executionTime", skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,
}

impl InvocationResponse {
    pub fn ok(body: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
            execution_time: Some(format!("{:.2}s", elapsed.as_secs_f64())),
        }
    }

    pub fn bad_request(body: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            body: body.into(),
            execution_time: None,
        }
    }

    pub fn server_error(body: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: body.into(),
            execution_time: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

fn missing_address() -> InvocationResponse {
    tracing::error!("No DB endpoint address in event payload");
    InvocationResponse::bad_request("DB endpoint address was not provided")
}

/// Response for an event that arrives when no handler could be built, such as
/// when settings are missing. The event is still checked first, so a missing
/// address stays a client error.
pub fn reject(event: &WarmingEvent, reason: &dyn std::fmt::Display) -> InvocationResponse {
    if event.address().is_none() {
        return missing_address();
    }
    tracing::error!("Warming invocation failed: {reason}");
    InvocationResponse::server_error(format!("Error: {reason}"))
}

pub struct WarmingHandler<D, C, O> {
    driver: D,
    credentials: C,
    queries: ObjectStoreQuerySource<O>,
    settings: WarmingSettings,
    connect_timeout: Duration,
}

impl<D, C, O> WarmingHandler<D, C, O>
where
    D: DatabaseDriver,
    C: CredentialProvider,
    O: ObjectStore,
{
    pub fn new(driver: D, credentials: C, store: O, settings: WarmingSettings) -> Self {
        Self {
            driver,
            credentials,
            queries: ObjectStoreQuerySource::new(store),
            settings,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub async fn handle(&self, event: &WarmingEvent) -> InvocationResponse {
        let started = Instant::now();
        tracing::info!(address = ?event.payload.address, "Warming invocation started");

        let Some(address) = event.address() else {
            return missing_address();
        };

        match self.warm(address).await {
            Ok(report) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    "Warming invocation finished in {:.2}s",
                    elapsed.as_secs_f64()
                );
                InvocationResponse::ok(
                    format!(
                        "DB warming complete: {}/{} queries succeeded",
                        report.succeeded, report.total
                    ),
                    elapsed,
                )
            }
            Err(e) => {
                tracing::error!("Warming invocation failed: {e}");
                InvocationResponse::server_error(format!("Error: {e}"))
            }
        }
    }

    async fn warm(&self, address: &str) -> Result<WarmingReport, InvocationError> {
        let credentials = self.credentials.resolve().await.context(CredentialsSnafu)?;
        let statements = self
            .queries
            .resolve_bulk(&self.settings.object_store)
            .await
            .context(QueriesSnafu)?;

        let params = ConnectParams::new(
            address,
            self.settings.port,
            &self.settings.database,
            &credentials,
            self.connect_timeout,
        );
        let probe = ConnectionProbe::new(&self.driver, params);
        ProbeLoop::new(probe, Duration::ZERO)
            .run_single_pass(&statements)
            .await
            .context(WarmingSnafu)
    }
}
