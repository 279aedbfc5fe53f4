//! Configuration management for charging services

use crate::error::{ChargingError, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_bind: String,
    pub log_level: String,
    pub log_json: bool,
    /// How long `shutdown` may take before the runtime gives up on it
    #[serde(skip)]
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "charging-service".to_string()),
            http_bind: env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: parse_var("LOG_JSON", true)?,
            shutdown_grace: Duration::from_secs(parse_var("SHUTDOWN_GRACE_SECS", 10u64)?),
        })
    }
}

/// Read an environment variable and parse it, falling back to `default` when unset.
///
/// A set but unparsable value is a configuration error rather than a silent default.
pub fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ChargingError::Config(format!("Invalid {}: {}", name, e))),
        _ => Ok(default),
    }
}
