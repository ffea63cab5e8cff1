use super::{ConfigError, InvalidArgumentSnafu, MissingParametersSnafu, ObjectStoreLocation};

pub const DEFAULT_DB_PORT: u16 = 5432;

/// Settings for the event-driven warming handler, taken from the process
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmingSettings {
    pub secret_id: String,
    pub region: String,
    pub database: String,
    pub port: u16,
    pub object_store: ObjectStoreLocation,
}

impl WarmingSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut read = |key: &'static str| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                missing.push(key);
            }
            value
        };

        let secret_id = read("DB_SECRET");
        let region = read("REGION_NAME");
        let database = read("DB_NAME");
        let bucket = read("S3_BUCKET");
        let prefix = read("S3_KEY_PREFIX");

        let (Some(secret_id), Some(region), Some(database), Some(bucket), Some(prefix)) =
            (secret_id, region, database, bucket, prefix)
        else {
            return MissingParametersSnafu { names: missing }.fail();
        };

        let port = match lookup("DB_PORT") {
            Some(raw) => raw.trim().parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
                InvalidArgumentSnafu {
                    key: "DB_PORT",
                    reason: format!("'{raw}' is not a valid port"),
                }
                .build()
            })?,
            None => DEFAULT_DB_PORT,
        };

        Ok(Self {
            secret_id,
            region,
            database,
            port,
            object_store: ObjectStoreLocation { bucket, prefix },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const COMPLETE: &[(&str, &str)] = &[
        ("DB_SECRET", "prod/aurora/probe"),
        ("REGION_NAME", "ap-northeast-2"),
        ("DB_NAME", "postgres"),
        ("S3_BUCKET", "query-exports"),
        ("S3_KEY_PREFIX", "top100/"),
    ];

    #[test]
    fn should_default_port_when_unset() {
        let settings = WarmingSettings::from_lookup(lookup(COMPLETE)).unwrap();

        assert_eq!(settings.port, DEFAULT_DB_PORT);
        assert_eq!(settings.object_store.bucket, "query-exports");
    }

    #[test]
    fn should_list_every_missing_variable() {
        let err = WarmingSettings::from_lookup(lookup(&[("DB_NAME", "postgres")])).unwrap_err();

        assert_eq!(
            err.missing_names(),
            ["DB_SECRET", "REGION_NAME", "S3_BUCKET", "S3_KEY_PREFIX"]
        );
    }

    #[test]
    fn should_reject_invalid_port() {
        let mut pairs = COMPLETE.to_vec();
        pairs.push(("DB_PORT", "not-a-port"));

        let err = WarmingSettings::from_lookup(lookup(&pairs)).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidArgument { key: "DB_PORT", .. }));
    }
}
