//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Without a database URL the service keeps everything in memory.
    pub database_url: Option<String>,
    pub log_level: Level,
    /// Without an API key stories come from the built-in sample generator.
    pub openai_api_key: Option<String>,
    pub story_model: String,
    pub cors_origin: String,
    pub auth_session_days: i64,
    pub reading_idle_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            log_level: Level::INFO,
            openai_api_key: None,
            story_model: "gpt-4o-mini".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            auth_session_days: 30,
            reading_idle_minutes: 120,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        // --- Load Server and Database Settings ---
        let bind_address = match non_blank("BIND_ADDRESS") {
            Some(value) => value.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
            })?,
            None => defaults.bind_address,
        };

        let database_url = non_blank("DATABASE_URL");

        let log_level = match non_blank("RUST_LOG") {
            Some(value) => value.parse::<Level>().map_err(|_| {
                ConfigError::InvalidValue(
                    "RUST_LOG".to_string(),
                    format!("'{}' is not a valid log level", value),
                )
            })?,
            None => defaults.log_level,
        };

        // --- Load API Keys (as optional) ---
        let openai_api_key = non_blank("OPENAI_API_KEY");

        // --- Load Adapter-specific Settings ---
        let story_model = non_blank("STORY_MODEL").unwrap_or(defaults.story_model);
        let cors_origin = non_blank("CORS_ORIGIN").unwrap_or(defaults.cors_origin);

        let auth_session_days =
            bounded_number(non_blank("AUTH_SESSION_DAYS"), "AUTH_SESSION_DAYS", MAX_AUTH_SESSION_DAYS)?
                .unwrap_or(defaults.auth_session_days);
        let reading_idle_minutes =
            bounded_number(
                non_blank("READING_IDLE_MINUTES"),
                "READING_IDLE_MINUTES",
                MAX_READING_IDLE_MINUTES,
            )?
                .unwrap_or(defaults.reading_idle_minutes);

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            story_model,
            cors_origin,
            auth_session_days,
            reading_idle_minutes,
        })
    }
}

/// Ten years.
pub const MAX_AUTH_SESSION_DAYS: i64 = 3650;
/// One week.
pub const MAX_READING_IDLE_MINUTES: i64 = 10_080;

/// Parses a whole number in `1..=max`. The upper bound keeps the derived
/// durations and expiry timestamps inside chrono's range.
fn bounded_number(value: Option<String>, key: &str, max: i64) -> Result<Option<i64>, ConfigError> {
    value
        .map(|raw| match raw.trim().parse::<i64>() {
            Ok(n) if (1..=max).contains(&n) => Ok(n),
            _ => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("'{}' is not a whole number between 1 and {}", raw, max),
            )),
        })
        .transpose()
}
