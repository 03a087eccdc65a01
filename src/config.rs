use {
    crate::domain::error::AuditError,
    std::{env, str::FromStr, sync::Arc, time::Duration},
};

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub database_max_connections: u32,
    pub retention_days: u32,
    pub archive_root: String,
    pub archive_base_url: String,
    pub archive_signing_key: Arc<str>,
    pub archive_url_ttl: Duration,
    pub archive_interval: Duration,
    pub archive_concurrency: usize,
    pub dispatch_batch_size: i64,
    pub dispatch_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AuditError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuditError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AuditError::Configuration(format!("{key} must be set")))
        };

        let config = Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?,
            retention_days: parse(&lookup, "AUDIT_RETENTION_DAYS", 90)?,
            archive_root: lookup("ARCHIVE_ROOT").unwrap_or_else(|| "./archives".into()),
            archive_base_url: lookup("ARCHIVE_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000/archives".into()),
            archive_signing_key: required("ARCHIVE_SIGNING_KEY")?.into(),
            archive_url_ttl: Duration::from_secs(parse(&lookup, "ARCHIVE_URL_TTL_SECS", 900)?),
            archive_interval: Duration::from_secs(parse(
                &lookup,
                "ARCHIVE_INTERVAL_SECS",
                86_400,
            )?),
            archive_concurrency: parse(&lookup, "ARCHIVE_CONCURRENCY", 4)?,
            dispatch_batch_size: parse(&lookup, "DISPATCH_BATCH_SIZE", 50)?,
            dispatch_poll_interval: Duration::from_millis(parse(
                &lookup,
                "DISPATCH_POLL_MS",
                1_000,
            )?),
        };

        if config.retention_days == 0 {
            return Err(AuditError::Configuration(
                "AUDIT_RETENTION_DAYS must be at least 1".into(),
            ));
        }
        if config.archive_concurrency == 0 || config.dispatch_batch_size <= 0 {
            return Err(AuditError::Configuration(
                "ARCHIVE_CONCURRENCY and DISPATCH_BATCH_SIZE must be positive".into(),
            ));
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AuditError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuditError::Configuration(format!("{key} has invalid value: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/audit"),
        ("ARCHIVE_SIGNING_KEY", "secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.archive_url_ttl, Duration::from_secs(900));
        assert_eq!(config.dispatch_batch_size, 50);
        assert_eq!(config.dispatch_poll_interval, Duration::from_millis(1000));
    }

    #[test]
    fn missing_required_is_configuration_error() {
        let err = Config::from_lookup(lookup(&REQUIRED[..1])).unwrap_err();
        assert!(matches!(err, AuditError::Configuration(m) if m.contains("ARCHIVE_SIGNING_KEY")));
    }

    #[test]
    fn invalid_number_is_configuration_error() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AUDIT_RETENTION_DAYS", "ninety"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, AuditError::Configuration(m) if m.contains("AUDIT_RETENTION_DAYS")));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AUDIT_RETENTION_DAYS", "0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
