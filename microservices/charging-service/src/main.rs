//! Charging Service
//!
//! Charging backend of the marketplace:
//! - Price computation for product orders (bundles, discounts, VAT)
//! - Initial, renovation and usage charges with redirection payments
//! - Applied rates and customer bills pushed to the billing API
//! - Customer-bill notification queue drained by a worker pool

#![allow(dead_code)]

use charging_core::telemetry::init_tracing;
use charging_core::{
    ChargingService, HealthStatus, MicroserviceRuntime, ReadinessStatus, Result,
};
use charging_store::{ensure_schema, PoolConfig, StorePool};
use std::sync::Arc;
use tracing::info;

mod api;
mod billing;
mod charging;
mod clients;
mod config;
mod orders;
mod payment;
mod pricing;
mod queue;
mod types;

#[cfg(test)]
mod testing;

use api::AppState;
use billing::BillingClient;
use charging::{Engine, LocalEngine, PricingBackend, RemoteEngine};
use clients::HttpClients;
use config::{ChargingConfig, StoreBackend};
use orders::{MemoryOrderStore, OrderService, OrderStore, PgOrderStore};
use payment::{FreeGateway, PaymentGateway, PaypalGateway};
use pricing::{PriceEngine, TaxResolver};
use queue::{CbWorker, CbWorkersService, MemoryQueueStore, PgQueueStore, QueueStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ChargingConfig::from_env()?;
    init_tracing(&config.service, "charging_service=debug")?;

    info!("Starting Charging Service");

    let grace = config.service.shutdown_grace;
    let service = Arc::new(ChargingServer::new(config).await?);
    MicroserviceRuntime::new(grace).run(service).await
}

pub struct ChargingServer {
    config: ChargingConfig,
    state: AppState,
    start_time: std::time::Instant,
}

impl ChargingServer {
    pub async fn new(config: ChargingConfig) -> Result<Self> {
        let clients = Arc::new(HttpClients::new(config.endpoints.clone(), config.http_timeout)?);

        let (orders, queue, pool): (Arc<dyn OrderStore>, Arc<dyn QueueStore>, Option<StorePool>) =
            match config.store_backend {
                StoreBackend::Memory => (
                    Arc::new(MemoryOrderStore::new()),
                    Arc::new(MemoryQueueStore::new()),
                    None,
                ),
                StoreBackend::Postgres => {
                    ensure_schema(&config.database_url).await?;
                    let pool = StorePool::new(&PoolConfig {
                        url: config.database_url.clone(),
                        ..PoolConfig::from_env()
                    })?;
                    (
                        Arc::new(PgOrderStore::new(pool.clone())),
                        Arc::new(PgQueueStore::new(pool.clone())),
                        Some(pool),
                    )
                }
            };

        let tax = TaxResolver::new(clients.clone(), config.default_tax_rate, config.tax_rates.clone());
        let prices = Arc::new(PriceEngine::new(clients.clone(), tax));

        let backend: Arc<dyn PricingBackend> = match &config.endpoints.billing_engine {
            Some(url) => Arc::new(RemoteEngine::new(url, config.http_timeout)?),
            None => Arc::new(LocalEngine::new()),
        };
        let gateway: Arc<dyn PaymentGateway> = match &config.paypal {
            Some(paypal) => Arc::new(PaypalGateway::new(
                &paypal.url,
                paypal.client_id.clone(),
                paypal.client_secret.clone(),
                config.http_timeout,
            )?),
            None => Arc::new(FreeGateway),
        };

        let engine = Arc::new(Engine::new(
            orders.clone(),
            backend,
            gateway,
            BillingClient::new(clients.clone()),
            clients.clone(),
            clients.clone(),
            &config.site_url,
        ));
        let order_service = Arc::new(OrderService::new(orders.clone(), prices.clone(), engine.clone()));

        let workers = Arc::new(CbWorkersService::new(CbWorker::new(
            queue.clone(),
            orders.clone(),
            clients.clone(),
            config.workers.clone(),
        )));

        let state = AppState {
            prices,
            orders: order_service,
            engine,
            queue,
            webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
            store_backend: orders.backend_name(),
            workers,
            pool,
        };

        Ok(Self {
            config,
            state,
            start_time: std::time::Instant::now(),
        })
    }
}

#[async_trait::async_trait]
impl ChargingService for ChargingServer {
    fn service_id(&self) -> &'static str {
        "charging-service"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        self.state.readiness().await
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Charging Service");
        self.state.workers.shutdown().await;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(
            http = %self.config.service.http_bind,
            store = self.state.store_backend,
            pricing = self.state.engine.backend_id(),
            gateway = self.state.engine.gateway_id(),
            "Starting Charging servers"
        );

        self.state.workers.start().await?;

        let router = api::create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.service.http_bind).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
