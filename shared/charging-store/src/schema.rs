//! Tables used by the charging backend

use crate::{Result, StoreClient};

/// Order documents and the customer-bill notification queue.
///
/// Orders are stored as serialized JSON text next to the columns the
/// lock and lookup queries filter on.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS charging_orders (
    id                  TEXT PRIMARY KEY,
    billing_account_id  TEXT,
    document            TEXT NOT NULL,
    locked              BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS charging_orders_billing_account
    ON charging_orders (billing_account_id);

CREATE TABLE IF NOT EXISTS charging_cb_queue (
    id          TEXT PRIMARY KEY,
    bill_id     TEXT NOT NULL,
    in_queue    BOOLEAN NOT NULL DEFAULT FALSE,
    attempts    INTEGER NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS charging_cb_queue_pending
    ON charging_cb_queue (in_queue, created_at);
"#;

/// Create the tables if they are missing
pub async fn ensure_schema(url: &str) -> Result<()> {
    tracing::info!("Ensuring charging schema");
    let client = StoreClient::connect(url).await?;
    client.batch_execute(SCHEMA).await
}
