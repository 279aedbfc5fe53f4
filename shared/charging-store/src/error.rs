//! Store Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("Query error: {0}")]
    Query(tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Row not found")]
    NotFound,
}

impl From<StoreError> for charging_core::ChargingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => charging_core::ChargingError::NotFound(err.to_string()),
            StoreError::Configuration(msg) => charging_core::ChargingError::Config(msg),
            other => charging_core::ChargingError::Database(other.to_string()),
        }
    }
}
