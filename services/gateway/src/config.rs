//! Configuration loading from environment variables.

use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string for the cold store
    pub database_url: String,

    /// Gateway listen address
    pub bind_addr: String,

    /// HMAC secret for bearer tokens
    pub jwt_secret: String,

    /// Bids per bidder per second through the rate gate
    pub bid_rate_limit_per_sec: u32,

    /// Anti-snipe window in seconds
    pub extension_threshold_secs: i64,

    /// Anti-snipe extension in seconds
    pub extension_duration_secs: i64,

    /// Post-end hot record retention in seconds
    pub retention_secs: i64,

    /// Attempts for the finalize-auction queue
    pub finalization_max_attempts: u32,

    /// Reserved toggle for a TLS hot-store transport
    pub hot_tls: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - DATABASE_URL: PostgreSQL connection string
    ///
    /// Optional variables (with defaults):
    /// - BIND_ADDR (0.0.0.0:8080)
    /// - JWT_SECRET (dev secret)
    /// - BID_RATE_LIMIT_PER_SEC (1)
    /// - AUCTION_EXTENSION_THRESHOLD_SEC (30)
    /// - AUCTION_EXTENSION_DURATION_SEC (30)
    /// - AUCTION_RETENTION_SEC (86400)
    /// - FINALIZATION_MAX_ATTEMPTS (5)
    /// - HOT_TLS (false)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            jwt_secret,
            bid_rate_limit_per_sec: parse_var("BID_RATE_LIMIT_PER_SEC", 1)?,
            extension_threshold_secs: parse_var("AUCTION_EXTENSION_THRESHOLD_SEC", 30)?,
            extension_duration_secs: parse_var("AUCTION_EXTENSION_DURATION_SEC", 30)?,
            retention_secs: parse_var("AUCTION_RETENTION_SEC", 86_400)?,
            finalization_max_attempts: parse_var("FINALIZATION_MAX_ATTEMPTS", 5)?,
            hot_tls: parse_var("HOT_TLS", false)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_optional_vars() {
        for name in [
            "BIND_ADDR",
            "JWT_SECRET",
            "BID_RATE_LIMIT_PER_SEC",
            "AUCTION_EXTENSION_THRESHOLD_SEC",
            "AUCTION_EXTENSION_DURATION_SEC",
            "AUCTION_RETENTION_SEC",
            "FINALIZATION_MAX_ATTEMPTS",
            "HOT_TLS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_database_url() {
        env::remove_var("DATABASE_URL");
        clear_optional_vars();

        let result = Config::from_env_only();
        assert!(result.is_err());

        if let Err(ConfigError::MissingVar(var)) = result {
            assert_eq!(var, "DATABASE_URL");
        } else {
            panic!("Expected MissingVar error");
        }
    }

    #[test]
    #[serial]
    fn test_config_with_defaults() {
        env::set_var("DATABASE_URL", "postgres://localhost/auctions");
        clear_optional_vars();

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/auctions");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.bid_rate_limit_per_sec, 1);
        assert_eq!(config.extension_threshold_secs, 30);
        assert_eq!(config.extension_duration_secs, 30);
        assert_eq!(config.retention_secs, 86_400);
        assert_eq!(config.finalization_max_attempts, 5);
        assert!(!config.hot_tls);

        env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial]
    fn test_config_rejects_garbage_numbers() {
        env::set_var("DATABASE_URL", "postgres://localhost/auctions");
        clear_optional_vars();
        env::set_var("AUCTION_EXTENSION_THRESHOLD_SEC", "soon");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidValue(_, _))));

        env::remove_var("AUCTION_EXTENSION_THRESHOLD_SEC");
        env::remove_var("DATABASE_URL");
    }
}
