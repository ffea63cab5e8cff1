//! Database credentials and the providers that resolve them.

use async_trait::async_trait;
use snafu::{Location, OptionExt, ResultExt, Snafu};
use std::fmt;
use std::io::{BufRead, Write};
use std::time::Instant;

use crate::secret_store::{SecretStore, SecretStoreError};

pub const PASSWORD_MASK: &str = "********";
pub const PASSWORD_ENV: &str = "PGPASSWORD";
pub const PASSWORD_PROMPT: &str = "Database password: ";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CredentialError {
    #[snafu(display("Missing required settings: {}", names.join(", ")))]
    MissingSettings {
        names: Vec<&'static str>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to fetch secret '{secret_id}': {source}"))]
    SecretFetch {
        secret_id: String,
        source: SecretStoreError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Secret '{secret_id}' is not a JSON document"))]
    SecretParse {
        secret_id: String,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Secret '{secret_id}' has no '{field}' field"))]
    MissingField {
        secret_id: String,
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to read the database password"))]
    PasswordPrompt {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &PASSWORD_MASK)
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self) -> Result<Credentials, CredentialError>;
}

/// Secret identifier and region, both required before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLocation {
    pub secret_id: String,
    pub region: String,
}

impl SecretLocation {
    pub fn from_options(
        secret_id: Option<String>,
        region: Option<String>,
    ) -> Result<Self, CredentialError> {
        let secret_id = secret_id.filter(|v| !v.trim().is_empty());
        let region = region.filter(|v| !v.trim().is_empty());
        match (secret_id, region) {
            (Some(secret_id), Some(region)) => Ok(Self { secret_id, region }),
            (secret_id, region) => {
                let mut names = Vec::new();
                if secret_id.is_none() {
                    names.push("secret_id");
                }
                if region.is_none() {
                    names.push("region");
                }
                tracing::error!("Missing secret store settings: {}", names.join(", "));
                MissingSettingsSnafu { names }.fail()
            }
        }
    }
}

pub struct SecretStoreCredentialProvider<S> {
    store: S,
    secret_id: String,
}

impl<S: SecretStore> SecretStoreCredentialProvider<S> {
    pub fn new(store: S, secret_id: impl Into<String>) -> Self {
        Self {
            store,
            secret_id: secret_id.into(),
        }
    }
}

#[async_trait]
impl<S: SecretStore> CredentialProvider for SecretStoreCredentialProvider<S> {
    async fn resolve(&self) -> Result<Credentials, CredentialError> {
        let started = Instant::now();
        let secret_id = self.secret_id.as_str();
        tracing::info!(secret_id, "Fetching database credentials from secret store");

        let raw = self
            .store
            .get_secret(secret_id)
            .await
            .context(SecretFetchSnafu { secret_id })?;
        let payload: serde_json::Value =
            serde_json::from_str(&raw).context(SecretParseSnafu { secret_id })?;

        tracing::info!("Fetched secret payload: {}", masked_payload(&payload));

        let username = string_field(&payload, "username").context(MissingFieldSnafu {
            secret_id,
            field: "username",
        })?;
        let password = string_field(&payload, "password").context(MissingFieldSnafu {
            secret_id,
            field: "password",
        })?;

        tracing::info!(
            "Secret fetched in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(Credentials::new(username, password))
    }
}

/// Credentials known up front: the configured user and a password taken from
/// the environment or typed at a prompt.
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Uses `PGPASSWORD` when set, otherwise prompts on `prompt` and reads one
    /// line from `input`. Meant for piped input; an interactive terminal
    /// should read the password without echo and use [`Self::new`].
    pub fn from_env_or_prompt(
        user: &str,
        env_password: Option<String>,
        input: &mut impl BufRead,
        prompt: &mut impl Write,
    ) -> Result<Self, CredentialError> {
        let password = match env_password {
            Some(password) => password,
            None => {
                write!(prompt, "{PASSWORD_PROMPT}").context(PasswordPromptSnafu)?;
                prompt.flush().context(PasswordPromptSnafu)?;
                let mut line = String::new();
                input.read_line(&mut line).context(PasswordPromptSnafu)?;
                line.trim_end_matches(['\r', '\n']).to_string()
            }
        };
        Ok(Self::new(Credentials::new(user, password)))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self) -> Result<Credentials, CredentialError> {
        Ok(self.credentials.clone())
    }
}

/// Renders a secret payload for logging with the password replaced.
pub fn masked_payload(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::Object(map) => {
            let mut masked = map.clone();
            if let Some(password) = masked.get_mut("password") {
                *password = serde_json::Value::String(PASSWORD_MASK.to_string());
            }
            serde_json::Value::Object(masked).to_string()
        }
        // Anything other than an object is never echoed.
        other => format!("<{} payload>", json_type(other)),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn string_field(payload: &serde_json::Value, field: &str) -> Option<String> {
    payload.get(field)?.as_str().map(str::to_string)
}
