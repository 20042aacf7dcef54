use crate::locale::DEFAULT_LOCALE;
use crate::rebuild::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use anyhow::{Context, Result};
use std::time::Duration;

pub const MIN_FETCH_TIMEOUT_SECS: u64 = 10;
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    // Network
    pub network_file: String,
    pub default_locale: String,

    // Storage (in-memory when unset)
    pub database_url: Option<String>,

    // Server
    pub port: u16,
    pub api_key: Option<String>,
    pub settings_nonce: String,

    // Rebuild / fetch tuning
    pub rebuild_batch_size: usize,
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            // Network
            network_file: std::env::var("NETWORK_FILE")
                .unwrap_or_else(|_| "data/network.json".to_string()),
            default_locale: std::env::var("DEFAULT_LOCALE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),

            // Storage
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            // Server
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            api_key: std::env::var("API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            settings_nonce: std::env::var("SETTINGS_NONCE")
                .context("SETTINGS_NONCE not set")?,

            // Rebuild / fetch tuning
            rebuild_batch_size: std::env::var("REBUILD_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE)
                .clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15)
                .clamp(MIN_FETCH_TIMEOUT_SECS, MAX_FETCH_TIMEOUT_SECS),
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "NETWORK_FILE",
        "DEFAULT_LOCALE",
        "DATABASE_URL",
        "PORT",
        "API_KEY",
        "SETTINGS_NONCE",
        "REBUILD_BATCH_SIZE",
        "FETCH_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        std::env::set_var("SETTINGS_NONCE", "nonce");

        let config = Config::from_env().expect("Should load config");

        assert_eq!(config.network_file, "data/network.json");
        assert_eq!(config.default_locale, "en_US");
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 8080);
        assert!(config.api_key.is_none());
        assert_eq!(config.rebuild_batch_size, 25);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(15));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_nonce_fails() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("SETTINGS_NONCE"));
    }

    #[test]
    #[serial]
    fn test_numeric_values_are_clamped() {
        clear_env();
        std::env::set_var("SETTINGS_NONCE", "nonce");
        std::env::set_var("REBUILD_BATCH_SIZE", "500");
        std::env::set_var("FETCH_TIMEOUT_SECS", "1");

        let config = Config::from_env().unwrap();
        assert_eq!(config.rebuild_batch_size, 100);
        assert_eq!(config.fetch_timeout_secs, 10);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("SETTINGS_NONCE", "nonce");
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("REBUILD_BATCH_SIZE", "many");

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.rebuild_batch_size, 25);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_optional_values_are_unset() {
        clear_env();
        std::env::set_var("SETTINGS_NONCE", "nonce");
        std::env::set_var("DATABASE_URL", "  ");
        std::env::set_var("API_KEY", "");

        let config = Config::from_env().unwrap();
        assert!(config.database_url.is_none());
        assert!(config.api_key.is_none());
        clear_env();
    }
}
