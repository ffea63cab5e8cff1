use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use super::{ConnectParams, DatabaseConnection, DatabaseDriver, DbError, ResultSet};

const APPLICATION_NAME: &str = "endpoint_probe";

/// PostgreSQL sessions over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct PgDriver;

#[async_trait]
impl DatabaseDriver for PgDriver {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<Box<dyn DatabaseConnection>, DbError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(params.host.as_str())
            .port(params.port)
            .dbname(params.database.as_str())
            .user(params.user.as_str())
            .password(params.password())
            .application_name(APPLICATION_NAME)
            .connect_timeout(params.connect_timeout);

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| DbError::Connect(describe(&e)))?;

        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Connection task ended with error");
            }
        });

        Ok(Box::new(PgConnection { client, task }))
    }
}

struct PgConnection {
    client: Client,
    task: JoinHandle<()>,
}

#[async_trait]
impl DatabaseConnection for PgConnection {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        let messages = self.client.simple_query(sql).await.map_err(classify)?;

        let mut result = ResultSet::default();
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if result.columns.is_empty() {
                        result.columns = row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect();
                    }
                    result
                        .rows
                        .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
                SimpleQueryMessage::CommandComplete(count) => result.rows_affected = Some(count),
                _ => {}
            }
        }
        Ok(result)
    }

    async fn close(self: Box<Self>) {
        let PgConnection { client, task } = *self;
        // Dropping the client sends Terminate and lets the connection task finish.
        drop(client);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Connection task did not shut down cleanly");
        }
    }
}

fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => e.to_string(),
    }
}

fn classify(e: tokio_postgres::Error) -> DbError {
    if let Some(db) = e.as_db_error() {
        let message = describe(&e);
        return if is_session_failure(db.code().code()) {
            DbError::ConnectionLost(message)
        } else {
            DbError::Query(message)
        };
    }
    if e.is_closed() {
        return DbError::ConnectionLost(e.to_string());
    }
    let io_failure = std::error::Error::source(&e).is_some_and(|s| s.is::<std::io::Error>());
    if io_failure {
        DbError::ConnectionLost(e.to_string())
    } else {
        DbError::Unexpected(e.to_string())
    }
}

/// SQLSTATE classes that mean the session itself is gone or unusable:
/// connection exceptions, authorization, insufficient resources and
/// operator intervention (admin shutdown, failover).
fn is_session_failure(code: &str) -> bool {
    ["08", "28", "53", "57P"]
        .iter()
        .any(|class| code.starts_with(class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_treat_failover_and_auth_codes_as_session_failures() {
        assert!(is_session_failure("08006"));
        assert!(is_session_failure("28P01"));
        assert!(is_session_failure("57P01"));
        assert!(!is_session_failure("42P01"));
        assert!(!is_session_failure("57014"));
    }
}
