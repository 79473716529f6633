//! Runner configuration
//!
//! Read from the environment (`DATABASE_URL`, `MIGRATE_*`), then overridden by
//! command-line flags in the `migrate` binary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::storage::backend::BackendKind;
use crate::storage::runner::LockPolicy;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/stellar.db";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported database URL scheme in '{0}' (expected sqlite:, postgres: or postgresql:)")]
    UnsupportedScheme(String),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub lock_attempts: u32,
    pub lock_backoff_ms: u64,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            lock_attempts: 5,
            lock_backoff_ms: 500,
        }
    }
}

impl MigrateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    /// The URL scheme is not checked here, so a command-line override can
    /// still replace it. Call `backend_kind()` once the config is final.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL").filter(|s| !s.is_empty()) {
            config.database_url = url;
        }
        if let Some(n) = parse_var(&lookup, "MIGRATE_MAX_CONNECTIONS")? {
            config.max_connections = n;
        }
        if let Some(n) = parse_var(&lookup, "MIGRATE_LOCK_ATTEMPTS")? {
            config.lock_attempts = n;
        }
        if let Some(n) = parse_var(&lookup, "MIGRATE_LOCK_BACKOFF_MS")? {
            config.lock_backoff_ms = n;
        }

        Ok(config)
    }

    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        BackendKind::from_url(&self.database_url)
            .ok_or_else(|| ConfigError::UnsupportedScheme(self.redacted_url()))
    }

    pub fn lock_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_backoff_ms)
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            attempts: self.lock_attempts.max(1),
            backoff: self.lock_backoff(),
        }
    }

    /// URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let url = &self.database_url;
        let Some(scheme_end) = url.find("://") else {
            return url.clone();
        };
        let rest = &url[scheme_end + 3..];
        let authority_end = rest.find('/').unwrap_or(rest.len());
        let authority = &rest[..authority_end];

        match (authority.rfind('@'), authority.find(':')) {
            (Some(at), Some(colon)) if colon < at => format!(
                "{}{}:****{}",
                &url[..scheme_end + 3],
                &authority[..colon],
                &rest[at..]
            ),
            _ => url.clone(),
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var).filter(|s| !s.trim().is_empty()) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = MigrateConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, MigrateConfig::default());
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Sqlite);
    }

    #[test]
    fn test_env_overrides() {
        let config = MigrateConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://app:secret@db:5432/stellar"),
            ("MIGRATE_MAX_CONNECTIONS", "2"),
            ("MIGRATE_LOCK_ATTEMPTS", "10"),
            ("MIGRATE_LOCK_BACKOFF_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Postgres);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.lock_policy().attempts, 10);
        assert_eq!(config.lock_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = MigrateConfig::from_lookup(lookup(&[("MIGRATE_LOCK_ATTEMPTS", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "MIGRATE_LOCK_ATTEMPTS",
                value: "many".into()
            }
        );

        // Scheme is checked on the final config, not while reading variables
        let config = MigrateConfig::from_lookup(lookup(&[("DATABASE_URL", "mysql://db/stellar")])).unwrap();
        assert!(matches!(config.backend_kind(), Err(ConfigError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_redacted_url_masks_password() {
        let config = MigrateConfig {
            database_url: "postgres://app:secret@db:5432/stellar".into(),
            ..Default::default()
        };
        assert_eq!(config.redacted_url(), "postgres://app:****@db:5432/stellar");

        let config = MigrateConfig {
            database_url: "postgres://db:5432/stellar".into(),
            ..Default::default()
        };
        assert_eq!(config.redacted_url(), "postgres://db:5432/stellar");
        assert_eq!(MigrateConfig::default().redacted_url(), DEFAULT_DATABASE_URL);
    }
}
