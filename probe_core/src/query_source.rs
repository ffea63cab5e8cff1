//! Resolves the SQL a run executes: a fixed statement, or statements read from
//! the newest CSV export in an object store.

use snafu::{Location, ResultExt, Snafu};
use std::time::Instant;

use crate::config::ObjectStoreLocation;
use crate::csv_extract::{CandidateQuery, CsvQueryExtractor, ExtractError};
use crate::object_store::{ObjectStore, ObjectStoreError, select_latest};

/// Storage consumed by Aurora, from `aurora_stat_file()`.
pub const VOLUME_QUERY: &str =
    "select sum(used_bytes) as volume_bytes_used from aurora_stat_file()";

/// Row count of `pgbench_accounts`. The serving instance address comes from
/// the follow-up lookup every cycle runs.
pub const PGBENCH_QUERY: &str = "SELECT COUNT(*) AS account_count FROM pgbench_accounts";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QuerySourceError {
    #[snafu(display("Static query is empty"))]
    EmptyStatement {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("No objects found under s3://{bucket}/{prefix}"))]
    NoObjectsFound {
        bucket: String,
        prefix: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to list s3://{bucket}/{prefix}: {source}"))]
    Listing {
        bucket: String,
        prefix: String,
        source: ObjectStoreError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to fetch s3://{bucket}/{key}: {source}"))]
    Fetch {
        bucket: String,
        key: String,
        source: ObjectStoreError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("s3://{bucket}/{key} is not UTF-8 text"))]
    NotUtf8 {
        bucket: String,
        key: String,
        source: std::string::FromUtf8Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("s3://{bucket}/{key}: {source}"))]
    Extract {
        bucket: String,
        key: String,
        source: ExtractError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub fn resolve_static(statement: &str) -> Result<String, QuerySourceError> {
    let statement = statement.trim();
    if statement.is_empty() {
        return EmptyStatementSnafu.fail();
    }
    tracing::info!("Using static query: {statement}");
    Ok(statement.to_string())
}

pub struct ObjectStoreQuerySource<O> {
    store: O,
    extractor: CsvQueryExtractor,
}

impl<O: ObjectStore> ObjectStoreQuerySource<O> {
    pub fn new(store: O) -> Self {
        Self::with_extractor(store, CsvQueryExtractor::default())
    }

    pub fn with_extractor(store: O, extractor: CsvQueryExtractor) -> Self {
        Self { store, extractor }
    }

    /// Highest-ranked `SELECT` in the newest object under the prefix.
    pub async fn resolve_best(
        &self,
        location: &ObjectStoreLocation,
    ) -> Result<CandidateQuery, QuerySourceError> {
        let (key, body) = self.fetch_latest(location).await?;
        self.extractor.extract_best(&body).context(ExtractSnafu {
            bucket: location.bucket.as_str(),
            key,
        })
    }

    /// Every statement in the newest object under the prefix, in row order.
    pub async fn resolve_bulk(
        &self,
        location: &ObjectStoreLocation,
    ) -> Result<Vec<String>, QuerySourceError> {
        let (key, body) = self.fetch_latest(location).await?;
        let queries = self.extractor.extract_all(&body);
        if queries.is_empty() {
            tracing::warn!("s3://{}/{key} holds no queries", location.bucket);
        }
        Ok(queries)
    }

    async fn fetch_latest(
        &self,
        location: &ObjectStoreLocation,
    ) -> Result<(String, String), QuerySourceError> {
        let started = Instant::now();
        let ObjectStoreLocation { bucket, prefix } = location;
        tracing::info!("Looking up the latest query file under s3://{bucket}/{prefix}");

        let objects = self
            .store
            .list(bucket, prefix)
            .await
            .context(ListingSnafu {
                bucket: bucket.as_str(),
                prefix: prefix.as_str(),
            })?;
        let Some(latest) = select_latest(&objects) else {
            tracing::error!("No objects found under s3://{bucket}/{prefix}");
            return NoObjectsFoundSnafu {
                bucket: bucket.as_str(),
                prefix: prefix.as_str(),
            }
            .fail();
        };
        let key = latest.key.clone();
        tracing::info!("Latest query file: {key}");

        let bytes = self.store.get(bucket, &key).await.context(FetchSnafu {
            bucket: bucket.as_str(),
            key: key.as_str(),
        })?;
        let body = String::from_utf8(bytes).context(NotUtf8Snafu {
            bucket: bucket.as_str(),
            key: key.as_str(),
        })?;

        tracing::info!(
            "Query file fetched in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok((key, body))
    }
}
