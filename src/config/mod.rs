//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on values that do not parse.
//! In local dev, call `dotenvy::dotenv().ok()` before this.

use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub log_level: String,
    pub otel_endpoint: Option<String>,
    /// Worker loops to run. `RELEVEL_WORKERS`.
    pub workers: usize,
    /// Cache sync deadline. `RELEVEL_SYNC_TIMEOUT_SECS`; 0 disables it.
    pub sync_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            workers: parsed_var("RELEVEL_WORKERS")?.unwrap_or(2),
            sync_timeout: match parsed_var::<u64>("RELEVEL_SYNC_TIMEOUT_SECS")?.unwrap_or(30) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("cannot parse {name}={raw}"))),
        Err(_) => Ok(None),
    }
}
