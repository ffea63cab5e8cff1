use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStreamError;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("S3 error: {0}")]
    S3(#[from] Box<aws_sdk_s3::Error>), // Box to avoid large enum size
    #[error("Failed to read object body: {0}")]
    ByteStream(#[from] ByteStreamError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, bucket: &str, prefix: &str)
    -> Result<Vec<ObjectSummary>, ObjectStoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

/// Most recently modified object; equal timestamps resolve to the
/// lexicographically greatest key.
pub fn select_latest(objects: &[ObjectSummary]) -> Option<&ObjectSummary> {
    objects.iter().max_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.key.cmp(&b.key))
    })
}

pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Client configured from the default AWS provider chain.
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(S3Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| Box::new(aws_sdk_s3::Error::from(e)))?;
            for object in page.contents() {
                let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                    continue;
                };
                // Folder placeholders carry no content.
                if key.ends_with('/') {
                    continue;
                }
                let Some(last_modified) =
                    DateTime::from_timestamp(modified.secs(), modified.subsec_nanos())
                else {
                    tracing::warn!(key, "Skipping object with out-of-range modification time");
                    continue;
                };
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    last_modified,
                });
            }
        }

        tracing::debug!("Listed {} objects under s3://{bucket}/{prefix}", objects.len());
        Ok(objects)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        tracing::debug!("Downloading s3://{bucket}/{key}");
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Box::new(aws_sdk_s3::Error::from(e)))?;

        Ok(response.body.collect().await?.into_bytes().to_vec())
    }
}
