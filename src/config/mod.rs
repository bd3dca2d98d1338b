//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `SecretString` so it never
//! lands in logs.

pub mod secrets;

use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub database_max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// How long a claim may stay `taken` before the reaper expires it.
    /// `None` disables the reaper.
    pub claim_timeout: Option<Duration>,
    pub reaper_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            database_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS")?.unwrap_or(10),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            claim_timeout: parsed_var("CLAIM_TIMEOUT_SECS")?.map(Duration::from_secs),
            reaper_interval: Duration::from_secs(parsed_var("REAPER_INTERVAL_SECS")?.unwrap_or(30)),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
