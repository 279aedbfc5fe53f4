//! Charging Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait the charging services implement
//! - Money and charge-period arithmetic shared by pricing and billing
//! - Error handling utilities
//! - Configuration and tracing bootstrap

pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod telemetry;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{ChargingError, Result};
pub use service::{ChargingService, DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus};
