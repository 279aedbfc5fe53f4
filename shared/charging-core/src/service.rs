//! Service trait and lifecycle runtime

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info, warn};

use crate::error::{ChargingError, Result};

/// Health status for liveness checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Readiness status for readiness checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
}

/// Standard trait every charging service implements
#[async_trait]
pub trait ChargingService: Send + Sync + 'static {
    /// Service identifier (e.g., "charging-service")
    fn service_id(&self) -> &'static str;

    /// Service version
    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Liveness
    async fn health(&self) -> HealthStatus;

    /// Readiness, with the state of each backing dependency
    async fn ready(&self) -> ReadinessStatus;

    /// Stop background work; bounded by the runtime's grace period
    async fn shutdown(&self) -> Result<()>;

    /// Serve until the listener fails; runs on its own task
    async fn start(&self) -> Result<()>;
}

/// Runs a service until Ctrl-C/SIGTERM, then shuts it down within a grace period
pub struct MicroserviceRuntime {
    grace: Duration,
}

impl MicroserviceRuntime {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub async fn run<S: ChargingService>(&self, service: Arc<S>) -> Result<()> {
        let started = Instant::now();
        info!(
            service_id = service.service_id(),
            version = service.version(),
            "Starting microservice"
        );

        let serving = service.clone();
        let mut handle = tokio::spawn(async move { serving.start().await });

        // `Some` when the service stopped on its own
        let exited: Option<Result<()>> = tokio::select! {
            _ = wait_for_signal() => {
                info!("Shutdown signal received");
                None
            }
            joined = &mut handle => Some(match joined {
                Ok(Ok(())) => {
                    warn!("Service exited before a shutdown signal");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Service failed");
                    Err(e)
                }
                Err(e) => {
                    error!(error = %e, "Service task panicked");
                    Err(ChargingError::Internal(format!("service task failed: {}", e)))
                }
            }),
        };

        match tokio::time::timeout(self.grace, service.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Error during shutdown"),
            Err(_) => warn!(grace_secs = self.grace.as_secs(), "Shutdown did not finish in time"),
        }
        if exited.is_none() {
            handle.abort();
        }

        info!(uptime_seconds = started.elapsed().as_secs(), "Microservice stopped");
        exited.unwrap_or(Ok(()))
    }
}

impl Default for MicroserviceRuntime {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
