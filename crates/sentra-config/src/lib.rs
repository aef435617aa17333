//! # Sentra configuration
//!
//! Environment-variable configuration for both daemons. Every knob has a
//! default suitable for a containerized deployment; invalid values are
//! fatal at startup rather than silently corrected.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An address variable did not parse as `host:port`.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The environment variable name.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// A required setting resolved to something unusable.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Runtime environment, controls the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Human-readable logs.
    #[default]
    Development,
    /// JSON logs.
    Production,
}

/// Service configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP bind address for the DNS listener (`DNS_ADDRESS`, default `:53`).
    pub dns_address: SocketAddr,

    /// Bind address for the Prometheus scrape endpoint
    /// (`HTTP_ADDRESS`, default `:8080`).
    pub http_address: SocketAddr,

    /// Threat-table location (`DATABASE_URL`): a SQLite file path, an
    /// optional `sqlite:` prefix, or the literal `memory:` for the
    /// in-process store. Default `sentra.db`.
    pub database_url: String,

    /// Upstream resolvers in failover order
    /// (`UPSTREAM_DNS_1`, `UPSTREAM_DNS_2`).
    pub upstreams: Vec<SocketAddr>,

    /// Per-attempt upstream timeout. Fixed at five seconds; not
    /// environment-tunable.
    pub upstream_timeout: Duration,

    /// Reserved (`RATE_LIMIT_PER_SECOND`, default 100).
    pub rate_limit_per_second: u32,

    /// Reserved (`MAX_QUERIES_PER_IP`, default 1000).
    pub max_queries_per_ip: u32,

    /// Log level (`LOG_LEVEL`, default `info`).
    pub log_level: String,

    /// Runtime environment (`SENTRA_ENV`, default `development`).
    pub environment: Environment,
}

impl Config {
    /// Loads configuration from the environment, applying defaults.
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            dns_address: parse_bind_addr("DNS_ADDRESS", &get_env("DNS_ADDRESS", ":53"))?,
            http_address: parse_bind_addr("HTTP_ADDRESS", &get_env("HTTP_ADDRESS", ":8080"))?,
            database_url: get_env("DATABASE_URL", "sentra.db"),
            upstreams: vec![
                parse_bind_addr("UPSTREAM_DNS_1", &get_env("UPSTREAM_DNS_1", "1.1.1.1:53"))?,
                parse_bind_addr("UPSTREAM_DNS_2", &get_env("UPSTREAM_DNS_2", "8.8.8.8:53"))?,
            ],
            upstream_timeout: Duration::from_secs(5),
            rate_limit_per_second: parse_u32("RATE_LIMIT_PER_SECOND", 100)?,
            max_queries_per_ip: parse_u32("MAX_QUERIES_PER_IP", 1000)?,
            log_level: get_env("LOG_LEVEL", "info"),
            environment: match get_env("SENTRA_ENV", "development").as_str() {
                "production" => Environment::Production,
                _ => Environment::Development,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.upstreams.is_empty() {
            return Err(ConfigError::Validation(
                "at least one upstream resolver is required".to_string(),
            ));
        }

        const LEVELS: [&str; 5] = ["debug", "info", "warn", "error", "fatal"];
        if !LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "LOG_LEVEL".to_string(),
                message: format!("unknown level '{}'", self.log_level),
            });
        }

        Ok(())
    }

    /// Returns true when running in production.
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Returns the SQLite path from `database_url`, or `None` for the
    /// in-memory store.
    pub fn database_path(&self) -> Option<&str> {
        let url = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url);
        if url == "memory:" || url == ":memory:" {
            None
        } else {
            Some(url)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns_address: "0.0.0.0:53".parse().unwrap(),
            http_address: "0.0.0.0:8080".parse().unwrap(),
            database_url: "sentra.db".to_string(),
            upstreams: vec!["1.1.1.1:53".parse().unwrap(), "8.8.8.8:53".parse().unwrap()],
            upstream_timeout: Duration::from_secs(5),
            rate_limit_per_second: 100,
            max_queries_per_ip: 1000,
            log_level: "info".to_string(),
            environment: Environment::Development,
        }
    }
}

fn get_env(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

/// Parses `host:port`, accepting the common `:port` shorthand for
/// "all interfaces".
fn parse_bind_addr(field: &str, value: &str) -> Result<SocketAddr> {
    let normalized = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };

    normalized
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("'{value}' is not a socket address: {e}"),
        })
}

fn parse_u32(key: &str, fallback: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value.parse().map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            message: format!("'{value}' is not an unsigned integer"),
        }),
        _ => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.dns_address.port(), 53);
        assert_eq!(cfg.http_address.port(), 8080);
        assert_eq!(cfg.upstreams.len(), 2);
        assert_eq!(cfg.upstream_timeout, Duration::from_secs(5));
        assert!(!cfg.is_production());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_bind_addr_shorthand() {
        let addr = parse_bind_addr("DNS_ADDRESS", ":5353").unwrap();
        assert_eq!(addr.port(), 5353);
        assert!(addr.ip().is_unspecified());

        let addr = parse_bind_addr("DNS_ADDRESS", "127.0.0.1:53").unwrap();
        assert_eq!(addr.port(), 53);

        assert!(parse_bind_addr("DNS_ADDRESS", "not-an-addr").is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut cfg = Config::default();
        cfg.log_level = "verbose".to_string();
        assert!(cfg.validate().is_err());

        cfg.log_level = "fatal".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_database_path_variants() {
        let mut cfg = Config::default();
        assert_eq!(cfg.database_path(), Some("sentra.db"));

        cfg.database_url = "sqlite:///var/lib/sentra/threats.db".to_string();
        assert_eq!(cfg.database_path(), Some("/var/lib/sentra/threats.db"));

        cfg.database_url = "memory:".to_string();
        assert_eq!(cfg.database_path(), None);
    }
}
