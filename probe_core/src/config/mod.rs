//! Probe configuration: a TOML file with `[connection]`, `[test]` and `[s3]`
//! sections, validated in a single pass.

use serde::Deserialize;
use snafu::{Location, ResultExt, Snafu};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod env;

pub use env::WarmingSettings;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted `[test] duration`, in seconds (30 days).
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("Config file not found: {}", path.display()))]
    FileNotFound {
        path: PathBuf,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to read config file {}", path.display()))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to parse config file {}: {source}", path.display()))]
    FileParse {
        path: PathBuf,
        source: toml::de::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Missing required settings: {}", names.join(", ")))]
    MissingParameters {
        names: Vec<&'static str>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Invalid value for '{key}': {reason}"))]
    InvalidArgument {
        key: &'static str,
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl ConfigError {
    /// Names of the missing settings, empty for every other kind of failure.
    pub fn missing_names(&self) -> &[&'static str] {
        match self {
            ConfigError::MissingParameters { names, .. } => names,
            _ => &[],
        }
    }
}

/// Bucket and key prefix holding the ranked query exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreLocation {
    pub bucket: String,
    pub prefix: String,
}

/// Validated, immutable settings for one probe run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub endpoint: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub duration: Duration,
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub object_store: Option<ObjectStoreLocation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawProbeConfig {
    #[serde(default)]
    pub connection: RawConnection,
    #[serde(default)]
    pub test: RawTest,
    #[serde(default)]
    pub s3: RawObjectStore,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawConnection {
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    /// Seconds.
    pub connect_timeout: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawTest {
    /// Seconds.
    pub duration: Option<u64>,
    /// Seconds, fractional values allowed.
    pub interval: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawObjectStore {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
}

impl ProbeConfig {
    /// Reads and validates the config file at `path`. The `[s3]` keys are
    /// only required when `require_object_store` is set.
    pub fn load(path: &Path, require_object_store: bool) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return FileNotFoundSnafu { path }.fail();
        }
        let text = std::fs::read_to_string(path).context(FileReadSnafu { path })?;
        let raw: RawProbeConfig = toml::from_str(&text).context(FileParseSnafu { path })?;
        raw.validate(require_object_store)
    }
}

impl RawProbeConfig {
    pub fn validate(self, require_object_store: bool) -> Result<ProbeConfig, ConfigError> {
        let mut missing = Vec::new();

        let endpoint = require(&mut missing, "endpoint", non_blank(self.connection.endpoint));
        let port = require(&mut missing, "port", self.connection.port);
        let database = require(&mut missing, "database", non_blank(self.connection.database));
        let user = require(&mut missing, "user", non_blank(self.connection.user));
        let duration = require(&mut missing, "duration", self.test.duration);
        let interval = require(&mut missing, "interval", self.test.interval);

        let (bucket, prefix) = if require_object_store {
            (
                require(&mut missing, "bucket", non_blank(self.s3.bucket)),
                require(&mut missing, "prefix", self.s3.prefix),
            )
        } else {
            (None, None)
        };

        let (
            Some(endpoint),
            Some(port),
            Some(database),
            Some(user),
            Some(duration),
            Some(interval),
        ) = (endpoint, port, database, user, duration, interval)
        else {
            return MissingParametersSnafu { names: missing }.fail();
        };
        if !missing.is_empty() {
            return MissingParametersSnafu { names: missing }.fail();
        }

        if port == 0 {
            return invalid("port", "must be between 1 and 65535");
        }
        if duration == 0 {
            return invalid("duration", "must be greater than zero");
        }
        if duration > MAX_DURATION_SECS {
            return invalid(
                "duration",
                &format!("must not exceed {MAX_DURATION_SECS} seconds"),
            );
        }
        let interval = seconds("interval", interval)?;
        let connect_timeout = match self.connection.connect_timeout {
            Some(secs) => seconds("connect_timeout", secs)?,
            None => DEFAULT_CONNECT_TIMEOUT,
        };
        if connect_timeout.is_zero() {
            return invalid("connect_timeout", "must be greater than zero");
        }

        let object_store = match (bucket, prefix) {
            (Some(bucket), Some(prefix)) => Some(ObjectStoreLocation { bucket, prefix }),
            _ => None,
        };

        Ok(ProbeConfig {
            endpoint,
            port,
            database,
            user,
            duration: Duration::from_secs(duration),
            interval,
            connect_timeout,
            object_store,
        })
    }
}

fn require<T>(missing: &mut Vec<&'static str>, key: &'static str, value: Option<T>) -> Option<T> {
    if value.is_none() {
        missing.push(key);
    }
    value
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn seconds(key: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        InvalidArgumentSnafu {
            key,
            reason: format!("{secs} is not a non-negative number of seconds"),
        }
        .build()
    })
}

fn invalid<T>(key: &'static str, reason: &str) -> Result<T, ConfigError> {
    InvalidArgumentSnafu { key, reason }.fail()
}
