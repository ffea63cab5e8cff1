use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("Secrets Manager error: {0}")]
    SecretsManager(#[from] Box<aws_sdk_secretsmanager::Error>), // Box to avoid large enum size
    #[error("secret '{0}' has no string value")]
    MissingSecretString(String),
}

/// Remote store returning a secret's JSON payload by identifier.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretStoreError>;
}

pub struct AwsSecretStore {
    client: SecretsManagerClient,
}

impl AwsSecretStore {
    pub async fn for_region(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: SecretsManagerClient::new(&config),
        }
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretStoreError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| Box::new(aws_sdk_secretsmanager::Error::from(e)))?;

        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| SecretStoreError::MissingSecretString(secret_id.to_string()))
    }
}
