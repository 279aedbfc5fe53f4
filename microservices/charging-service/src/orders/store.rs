//! Order persistence and the per-order billing lock

use async_trait::async_trait;
use charging_core::{ChargingError, Result};
use charging_store::StorePool;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::types::Order;

/// Order documents plus the lock that serialises charging and bill registration
#[async_trait]
pub trait OrderStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Insert a new order; `Conflict` when the id is taken
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Order>>;

    /// Replace an existing order document without touching its lock
    async fn save(&self, order: &Order) -> Result<()>;

    /// Atomically take the order lock; false when someone else holds it
    async fn try_lock(&self, id: &str) -> Result<bool>;

    async fn unlock(&self, id: &str) -> Result<()>;

    /// Order of the billing account whose contracts cover any of the products
    async fn find_by_bill_owner(&self, billing_account_id: &str, product_ids: &[String]) -> Result<Option<Order>>;
}

struct StoredOrder {
    order: Order,
    locked: bool,
}

/// In-memory order store
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    orders: Arc<DashMap<String, StoredOrder>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.orders.get(id).map(|o| o.locked).unwrap_or(false)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        match self.orders.entry(order.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ChargingError::Conflict(format!("order {} already exists", order.id)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(StoredOrder {
                    order: order.clone(),
                    locked: false,
                });
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        Ok(self.orders.get(id).map(|o| o.order.clone()))
    }

    async fn save(&self, order: &Order) -> Result<()> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ChargingError::NotFound(format!("order {}", order.id)))?;
        stored.order = order.clone();
        Ok(())
    }

    async fn try_lock(&self, id: &str) -> Result<bool> {
        let mut stored = self
            .orders
            .get_mut(id)
            .ok_or_else(|| ChargingError::NotFound(format!("order {}", id)))?;
        if stored.locked {
            return Ok(false);
        }
        stored.locked = true;
        Ok(true)
    }

    async fn unlock(&self, id: &str) -> Result<()> {
        if let Some(mut stored) = self.orders.get_mut(id) {
            stored.locked = false;
        }
        Ok(())
    }

    async fn find_by_bill_owner(&self, billing_account_id: &str, product_ids: &[String]) -> Result<Option<Order>> {
        Ok(self
            .orders
            .iter()
            .find(|entry| {
                let order = &entry.value().order;
                order.billing_account_id.as_deref() == Some(billing_account_id)
                    && order.owns_any_product(product_ids)
            })
            .map(|entry| entry.value().order.clone()))
    }
}

/// PostgreSQL order store
#[derive(Clone)]
pub struct PgOrderStore {
    pool: StorePool,
}

impl PgOrderStore {
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    fn decode(document: &str) -> Result<Order> {
        Ok(serde_json::from_str(document)?)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert(&self, order: &Order) -> Result<()> {
        let document = serde_json::to_string(order)?;
        let inserted = self
            .pool
            .execute(
                "INSERT INTO charging_orders (id, billing_account_id, document) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO NOTHING",
                &[&order.id, &order.billing_account_id, &document],
            )
            .await?;

        if inserted == 0 {
            return Err(ChargingError::Conflict(format!("order {} already exists", order.id)));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        let row = self
            .pool
            .query_opt("SELECT document FROM charging_orders WHERE id = $1", &[&id])
            .await?;
        row.map(|r| Self::decode(r.get::<_, &str>(0))).transpose()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn save(&self, order: &Order) -> Result<()> {
        let document = serde_json::to_string(order)?;
        let updated = self
            .pool
            .execute(
                "UPDATE charging_orders SET document = $2, billing_account_id = $3, updated_at = now()
                 WHERE id = $1",
                &[&order.id, &document, &order.billing_account_id],
            )
            .await?;

        if updated == 0 {
            return Err(ChargingError::NotFound(format!("order {}", order.id)));
        }
        Ok(())
    }

    async fn try_lock(&self, id: &str) -> Result<bool> {
        let taken = self
            .pool
            .execute(
                "UPDATE charging_orders SET locked = TRUE WHERE id = $1 AND locked = FALSE",
                &[&id],
            )
            .await?;
        if taken == 1 {
            debug!(order_id = %id, "Order locked");
            return Ok(true);
        }

        let exists = self
            .pool
            .query_opt("SELECT 1 FROM charging_orders WHERE id = $1", &[&id])
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(ChargingError::NotFound(format!("order {}", id))),
        }
    }

    async fn unlock(&self, id: &str) -> Result<()> {
        self.pool
            .execute("UPDATE charging_orders SET locked = FALSE WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn find_by_bill_owner(&self, billing_account_id: &str, product_ids: &[String]) -> Result<Option<Order>> {
        let rows = self
            .pool
            .query(
                "SELECT document FROM charging_orders WHERE billing_account_id = $1 ORDER BY updated_at DESC",
                &[&billing_account_id],
            )
            .await?;

        for row in rows {
            let order = Self::decode(row.get::<_, &str>(0))?;
            if order.owns_any_product(product_ids) {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }
}
