//! Persistent queue of customer-bill notifications

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use charging_core::Result;
use charging_store::{Row, StorePool};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A customer bill waiting to be registered on its order.
///
/// `in_queue` is true while a worker owns the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub bill_id: String,
    pub in_queue: bool,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(bill_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bill_id: bill_id.to_string(),
            in_queue: false,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn push(&self, bill_id: &str) -> Result<QueueEntry>;

    /// Claim the oldest unclaimed entry, counting the attempt
    async fn claim_next(&self) -> Result<Option<QueueEntry>>;

    /// Release a claimed entry for a later sweep
    async fn unmark(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Release every claimed entry; run at startup after an unclean stop
    async fn reset_claimed(&self) -> Result<u64>;

    async fn len(&self) -> Result<usize>;
}

/// In-memory queue store
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    entries: Arc<Mutex<Vec<QueueEntry>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, bill_id: &str) -> Result<QueueEntry> {
        let entry = QueueEntry::new(bill_id);
        self.entries.lock().push(entry.clone());
        Ok(entry)
    }

    async fn claim_next(&self) -> Result<Option<QueueEntry>> {
        let mut entries = self.entries.lock();
        let next = entries
            .iter_mut()
            .filter(|e| !e.in_queue)
            .min_by_key(|e| e.created_at);

        Ok(next.map(|entry| {
            entry.in_queue = true;
            entry.attempts += 1;
            entry.clone()
        }))
    }

    async fn unmark(&self, id: &str) -> Result<()> {
        if let Some(entry) = self.entries.lock().iter_mut().find(|e| e.id == id) {
            entry.in_queue = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entries.lock().retain(|e| e.id != id);
        Ok(())
    }

    async fn reset_claimed(&self) -> Result<u64> {
        let mut reset = 0;
        for entry in self.entries.lock().iter_mut().filter(|e| e.in_queue) {
            entry.in_queue = false;
            reset += 1;
        }
        Ok(reset)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().len())
    }
}

/// PostgreSQL queue store; claims skip rows locked by concurrent claimers
#[derive(Clone)]
pub struct PgQueueStore {
    pool: StorePool,
}

impl PgQueueStore {
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    fn entry(row: &Row) -> QueueEntry {
        QueueEntry {
            id: row.get("id"),
            bill_id: row.get("bill_id"),
            in_queue: row.get("in_queue"),
            attempts: u32::try_from(row.get::<_, i32>("attempts")).unwrap_or(0),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn push(&self, bill_id: &str) -> Result<QueueEntry> {
        let entry = QueueEntry::new(bill_id);
        self.pool
            .execute(
                "INSERT INTO charging_cb_queue (id, bill_id, in_queue, attempts, created_at)
                 VALUES ($1, $2, FALSE, 0, $3)",
                &[&entry.id, &entry.bill_id, &entry.created_at],
            )
            .await?;
        Ok(entry)
    }

    async fn claim_next(&self) -> Result<Option<QueueEntry>> {
        let row = self
            .pool
            .query_opt(
                "UPDATE charging_cb_queue SET in_queue = TRUE, attempts = attempts + 1
                 WHERE id = (
                     SELECT id FROM charging_cb_queue
                     WHERE in_queue = FALSE
                     ORDER BY created_at
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 RETURNING id, bill_id, in_queue, attempts, created_at",
                &[],
            )
            .await?;
        Ok(row.as_ref().map(Self::entry))
    }

    async fn unmark(&self, id: &str) -> Result<()> {
        self.pool
            .execute("UPDATE charging_cb_queue SET in_queue = FALSE WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.pool
            .execute("DELETE FROM charging_cb_queue WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn reset_claimed(&self) -> Result<u64> {
        Ok(self
            .pool
            .execute("UPDATE charging_cb_queue SET in_queue = FALSE WHERE in_queue = TRUE", &[])
            .await?)
    }

    async fn len(&self) -> Result<usize> {
        let row = self
            .pool
            .query_opt("SELECT COUNT(*) FROM charging_cb_queue", &[])
            .await?;
        Ok(row
            .map(|r| r.get::<_, i64>(0))
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0))
    }
}
