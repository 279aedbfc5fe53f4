//! Charging Store
//!
//! PostgreSQL wire-protocol access for the charging backend.
//! Provides connection pooling, a single-connection client, and the schema
//! the order and customer-bill queue tables live in.

mod client;
mod error;
mod pool;
mod schema;

pub use client::StoreClient;
pub use error::{Result, StoreError};
pub use pool::{PoolConfig, StorePool};
pub use schema::{ensure_schema, SCHEMA};

/// Re-export tokio-postgres types for convenience
pub use tokio_postgres::{types::ToSql, Row};
