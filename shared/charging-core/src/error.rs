//! Error types for charging services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChargingError>;

#[derive(Error, Debug)]
pub enum ChargingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment error: {0}")]
    Payment(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ChargingError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Payment(_) => 402,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Upstream(_) => 502,
            Self::Unavailable(_) => 503,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Payment(_) => "PAYMENT_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
        }
    }
}

impl From<std::io::Error> for ChargingError {
    fn from(err: std::io::Error) -> Self {
        ChargingError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ChargingError {
    fn from(err: serde_json::Error) -> Self {
        ChargingError::Internal(format!("serialization: {}", err))
    }
}
