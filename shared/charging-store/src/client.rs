//! Single-connection store client

use tokio_postgres::{Client, NoTls};
use tracing::{debug, instrument};

use crate::{Result, StoreError};

/// Dedicated connection, used where a long-lived session is simpler than
/// checking connections out of the pool (migrations, one-off tools).
#[derive(Debug)]
pub struct StoreClient {
    client: Client,
}

impl StoreClient {
    /// Connect to the store
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self> {
        debug!("Connecting to charging store");

        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(StoreError::Connection)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Store connection error: {}", e);
            }
        });

        Ok(Self { client })
    }

    /// Execute batch statements
    #[instrument(skip(self, sql))]
    pub async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(StoreError::Query)
    }

    /// Check if connection is healthy
    pub async fn is_healthy(&self) -> bool {
        self.client.simple_query("SELECT 1").await.is_ok()
    }
}
