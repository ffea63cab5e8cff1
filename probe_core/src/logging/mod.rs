use std::path::PathBuf;
use std::sync::Arc;

pub use crate::logging::error::LogError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;

mod error;

pub const DEFAULT_DIRECTIVE: &str = "info";

pub struct LoggingConfig {
    pub log_file: Option<PathBuf>,
    pub stderr: bool,
    pub json: bool,
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
}

impl LoggingConfig {
    pub fn new(log_file: Option<PathBuf>, stderr: bool, json: bool) -> Self {
        Self {
            log_file,
            stderr,
            json,
            default_directive: DEFAULT_DIRECTIVE.to_string(),
        }
    }

    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

pub fn init(config: LoggingConfig) -> Result<(), LogError> {
    let subscriber = Registry::default().with(env_filter(&config.default_directive));

    let file_layer = if let Some(log_file) = config.log_file {
        let log_file =
            std::fs::File::create(log_file).map_err(|e| LogError::InitError(e.to_string()))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
    } else {
        None
    };
    let subscriber = subscriber.with(file_layer);

    let stderr_text_layer = (config.stderr && !config.json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let subscriber = subscriber.with(stderr_text_layer);

    let stderr_json_layer = (config.stderr && config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let subscriber = subscriber.with(stderr_json_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LogError::InitError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_fall_back_to_default_directive_when_invalid() {
        // Given a directive that does not parse
        let filter = env_filter("info,[[[");

        // Then a usable filter is still produced
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn should_fail_when_log_file_cannot_be_created() {
        // Given a log file inside a directory that does not exist
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig::new(Some(dir.path().join("missing/probe.log")), false, false);

        // When initializing
        let result = init(config);

        // Then the file error is reported before any subscriber is installed
        assert!(matches!(result, Err(LogError::InitError(_))));
    }
}
