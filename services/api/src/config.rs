//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

/// Upper bound for `CHECKOUT_MAX_ATTEMPTS`.
pub const MAX_CHECKOUT_ATTEMPTS: u32 = 10;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub admin_api_key: Option<String>,
    pub webhook_secret: String,
    pub payment_provider_url: String,
    pub payment_provider_api_key: Option<String>,
    pub checkout_expiry: Duration,
    pub checkout_max_attempts: u32,
    pub sweep_interval: Duration,
    pub token_cache_ttl: Duration,
    pub cors_origin: String,
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
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000".parse::<SocketAddr>())?;
        let database_url = required(&lookup, "DATABASE_URL")?;
        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", Ok(5))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Secrets ---
        let admin_api_key = lookup("ADMIN_API_KEY").filter(|key| !key.is_empty());
        let webhook_secret = required(&lookup, "WEBHOOK_SECRET")?;

        // --- Payment Provider ---
        let payment_provider_url = required(&lookup, "PAYMENT_PROVIDER_URL")?;
        let payment_provider_api_key = lookup("PAYMENT_PROVIDER_API_KEY");

        // --- Entitlement Settings ---
        let checkout_expiry =
            Duration::from_secs(parse_or(&lookup, "CHECKOUT_EXPIRY_SECS", Ok(1800u64))?);
        let checkout_max_attempts = parse_or(&lookup, "CHECKOUT_MAX_ATTEMPTS", Ok(3u32))?;
        if !(1..=MAX_CHECKOUT_ATTEMPTS).contains(&checkout_max_attempts) {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_MAX_ATTEMPTS".to_string(),
                format!("must be between 1 and {}", MAX_CHECKOUT_ATTEMPTS),
            ));
        }
        let sweep_interval =
            Duration::from_secs(parse_or(&lookup, "SWEEP_INTERVAL_SECS", Ok(300u64))?);
        if sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SWEEP_INTERVAL_SECS".to_string(),
                "must be positive".to_string(),
            ));
        }
        let token_cache_ttl =
            Duration::from_secs(parse_or(&lookup, "TOKEN_CACHE_TTL_SECS", Ok(30u64))?);
        if token_cache_ttl > guide_access_core::registry::MAX_CACHE_TTL {
            return Err(ConfigError::InvalidValue(
                "TOKEN_CACHE_TTL_SECS".to_string(),
                "must not exceed 60 seconds".to_string(),
            ));
        }

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            admin_api_key,
            webhook_secret,
            payment_provider_url,
            payment_provider_api_key,
            checkout_expiry,
            checkout_max_attempts,
            sweep_interval,
            token_cache_ttl,
            cors_origin,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

/// Parses `key` when set, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, key: &str, default: Result<T, T::Err>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => default.map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}
