//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::messaging::{DeletePolicy, SessionConfig};
use crate::rate_limit::RateLimitConfig;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")] Missing(&'static str),
    #[error("JWT_SECRET must be at least 32 characters long")] WeakSecret,
    #[error("invalid value for {name}: {value}")] Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    /// Directory of the in-memory store snapshot; no persistence when unset.
    pub data_dir: Option<PathBuf>,
    pub frontend_url: Option<String>,
    /// Handed to `ChatSession::open` by whoever hosts chat sessions; the HTTP
    /// server itself runs none.
    pub session: SessionConfig,
    /// Period of the ledger reconciliation job; off when unset.
    pub reconcile_interval: Option<Duration>,
    pub rate_limit_enabled: bool,
    pub rate_limit: RateLimitConfig,
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let delete_policy = match get("MESSAGE_DELETE_POLICY") {
            Some(v) => v
                .parse::<DeletePolicy>()
                .map_err(|_| ConfigError::Invalid { name: "MESSAGE_DELETE_POLICY", value: v })?,
            None => DeletePolicy::default(),
        };
        let refresh_ms: u64 = parse("CHAT_REFRESH_DELAY_MS", get("CHAT_REFRESH_DELAY_MS"))?.unwrap_or(500);
        let reconcile_secs: Option<u64> = parse("RECONCILE_INTERVAL_SECS", get("RECONCILE_INTERVAL_SECS"))?;

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse("PORT", get("PORT"))?.unwrap_or(8080),
            database_url: get("DATABASE_URL"),
            data_dir: get("STARTORIGIN_DATA_DIR").map(PathBuf::from),
            frontend_url: get("FRONTEND_URL"),
            session: SessionConfig { refresh_delay: Duration::from_millis(refresh_ms), delete_policy },
            reconcile_interval: reconcile_secs.filter(|s| *s > 0).map(Duration::from_secs),
            rate_limit_enabled: parse("RL_ENABLED", get("RL_ENABLED"))?.unwrap_or(true),
            rate_limit: RateLimitConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.bind_addr, "0.0.0.0");
        assert_eq!(cfg.session.refresh_delay, Duration::from_millis(500));
        assert_eq!(cfg.session.delete_policy, DeletePolicy::SoftPerViewer);
        assert!(cfg.reconcile_interval.is_none());
        assert!(cfg.rate_limit_enabled);
    }

    #[test]
    fn secret_is_required_and_long() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
        assert_eq!(Config::from_lookup(lookup(&[("JWT_SECRET", "short")])).unwrap_err(), ConfigError::WeakSecret);
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = Config::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("PORT", "9000"),
            ("MESSAGE_DELETE_POLICY", "hard"),
            ("RECONCILE_INTERVAL_SECS", "60"),
            ("CHAT_REFRESH_DELAY_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.session.delete_policy, DeletePolicy::Hard);
        assert_eq!(cfg.reconcile_interval, Some(Duration::from_secs(60)));
        assert_eq!(cfg.session.refresh_delay, Duration::ZERO);

        let err = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
