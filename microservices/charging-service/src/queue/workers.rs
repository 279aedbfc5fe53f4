//! Customer-bill workers
//!
//! A carrier task claims queued entries and feeds them through a bounded
//! channel to a pool of workers. Each worker registers the bill on the order
//! that owns it, under the order lock.

use charging_core::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{QueueEntry, QueueStore};
use crate::clients::BillingApi;
use crate::config::WorkerConfig;
use crate::orders::OrderStore;

/// What happened to one queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Bill recorded on its order (or already known there)
    Registered,
    /// Bill or owning order does not exist; entry dropped
    Discarded,
    /// Order lock held by someone else
    Busy,
}

#[derive(Clone)]
pub struct CbWorker {
    queue: Arc<dyn QueueStore>,
    orders: Arc<dyn OrderStore>,
    billing: Arc<dyn BillingApi>,
    config: WorkerConfig,
}

impl CbWorker {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        orders: Arc<dyn OrderStore>,
        billing: Arc<dyn BillingApi>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            orders,
            billing,
            config,
        }
    }

    /// Register the entry's bill on its order
    pub async fn process(&self, entry: &QueueEntry) -> Result<Processed> {
        let Some(bill) = self.billing.get_customer_bill(&entry.bill_id).await? else {
            warn!(bill_id = %entry.bill_id, "Customer bill not found, dropping notification");
            return Ok(Processed::Discarded);
        };

        let Some(owner) = self
            .orders
            .find_by_bill_owner(&bill.billing_account_id, &bill.product_ids)
            .await?
        else {
            warn!(
                bill_id = %bill.id,
                billing_account_id = %bill.billing_account_id,
                "No order owns the customer bill, dropping notification"
            );
            return Ok(Processed::Discarded);
        };

        if !self.orders.try_lock(&owner.id).await? {
            return Ok(Processed::Busy);
        }

        let result: Result<Processed> = async {
            let Some(mut order) = self.orders.get(&owner.id).await? else {
                return Ok(Processed::Discarded);
            };
            if order.register_bill(&bill) {
                self.orders.save(&order).await?;
                info!(order_id = %order.id, bill_id = %bill.id, "Customer bill registered");
            } else {
                debug!(order_id = %order.id, bill_id = %bill.id, "Customer bill already registered");
            }
            Ok(Processed::Registered)
        }
        .await;

        if let Err(e) = self.orders.unlock(&owner.id).await {
            warn!(order_id = %owner.id, error = %e, "Failed to release order lock");
        }
        result
    }

    /// Process an entry and settle its place in the queue
    async fn handle(&self, entry: QueueEntry, requeue: &mpsc::Sender<QueueEntry>) {
        let settled = match self.process(&entry).await {
            Ok(Processed::Registered) | Ok(Processed::Discarded) => self.queue.remove(&entry.id).await,
            Ok(Processed::Busy) => {
                tokio::time::sleep(self.config.requeue_delay).await;
                let id = entry.id.clone();
                match requeue.try_send(entry) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                        debug!(entry_id = %id, "Channel unavailable, leaving entry for the next sweep");
                        self.queue.unmark(&id).await
                    }
                }
            }
            Err(e) => {
                warn!(bill_id = %entry.bill_id, attempts = entry.attempts, error = %e, "Customer bill processing failed");
                self.queue.unmark(&entry.id).await
            }
        };

        if let Err(e) = settled {
            warn!(error = %e, "Failed to update customer-bill queue");
        }
    }
}

/// Feed claimed entries into the channel until shutdown
async fn carrier(
    queue: Arc<dyn QueueStore>,
    tx: mpsc::Sender<QueueEntry>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Customer-bill carrier started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.claim_next().await {
            Ok(Some(entry)) => {
                tokio::select! {
                    sent = tx.send(entry) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to claim customer-bill entry");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    debug!("Customer-bill carrier stopped");
}

async fn worker(
    index: usize,
    ctx: CbWorker,
    rx: Arc<AsyncMutex<mpsc::Receiver<QueueEntry>>>,
    requeue: mpsc::Sender<QueueEntry>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = index, "Customer-bill worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                entry = rx.recv() => entry,
                _ = shutdown.changed() => None,
            }
        };
        let Some(entry) = next else {
            break;
        };

        ctx.handle(entry, &requeue).await;
    }

    debug!(worker = index, "Customer-bill worker stopped");
}

/// Owner of the carrier and worker tasks
pub struct CbWorkersService {
    ctx: CbWorker,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CbWorkersService {
    pub fn new(ctx: CbWorker) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.ctx.queue
    }

    pub fn is_running(&self) -> bool {
        self.handles.lock().iter().any(|h| !h.is_finished())
    }

    /// Release stale claims, then spawn the carrier and the workers
    pub async fn start(&self) -> Result<()> {
        let reset = self.ctx.queue.reset_claimed().await?;
        if reset > 0 {
            info!(entries = reset, "Released customer-bill entries claimed before restart");
        }

        self.shutdown.send_replace(false);
        let capacity = self.ctx.config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut handles = Vec::with_capacity(self.ctx.config.workers + 1);
        handles.push(tokio::spawn(carrier(
            self.ctx.queue.clone(),
            tx.clone(),
            self.ctx.config.clone(),
            self.shutdown.subscribe(),
        )));
        for index in 0..self.ctx.config.workers.max(1) {
            handles.push(tokio::spawn(worker(
                index,
                self.ctx.clone(),
                rx.clone(),
                tx.clone(),
                self.shutdown.subscribe(),
            )));
        }
        self.handles.lock().extend(handles);

        info!(
            workers = self.ctx.config.workers.max(1),
            capacity,
            "Customer-bill workers started"
        );
        Ok(())
    }

    /// Signal every task and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Customer-bill task ended abnormally");
            }
        }
        info!("Customer-bill workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::MemoryOrderStore;
    use crate::queue::MemoryQueueStore;
    use crate::testing::{sample_bill, sample_order, MemoryBillingApi};
    use std::time::Duration;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            workers: 2,
            queue_capacity: 4,
            poll_interval: Duration::from_millis(10),
            requeue_delay: Duration::from_millis(5),
        }
    }

    async fn setup() -> (CbWorker, MemoryQueueStore, MemoryOrderStore, Arc<MemoryBillingApi>) {
        let queue = MemoryQueueStore::new();
        let orders = MemoryOrderStore::new();
        let billing = Arc::new(MemoryBillingApi::default());
        orders.insert(&sample_order("order-1")).await.unwrap();
        let ctx = CbWorker::new(
            Arc::new(queue.clone()),
            Arc::new(orders.clone()),
            billing.clone(),
            fast_config(),
        );
        (ctx, queue, orders, billing)
    }

    #[tokio::test]
    async fn test_process_registers_bill_once() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        let entry = queue.push("cb-1").await.unwrap();

        assert_eq!(ctx.process(&entry).await.unwrap(), Processed::Registered);
        assert_eq!(ctx.process(&entry).await.unwrap(), Processed::Registered);

        let order = orders.get("order-1").await.unwrap().unwrap();
        assert_eq!(order.contracts[0].bills, vec!["cb-1".to_string()]);
        assert!(!orders.is_locked("order-1"));
    }

    #[tokio::test]
    async fn test_process_discards_unknown_bill_and_owner() {
        let (ctx, queue, _orders, billing) = setup().await;
        let missing = queue.push("cb-missing").await.unwrap();
        assert_eq!(ctx.process(&missing).await.unwrap(), Processed::Discarded);

        billing.insert_bill(sample_bill("cb-2", "ba-other", &["prod-1"]));
        let orphan = queue.push("cb-2").await.unwrap();
        assert_eq!(ctx.process(&orphan).await.unwrap(), Processed::Discarded);
    }

    #[tokio::test]
    async fn test_process_reports_busy_order() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        let entry = queue.push("cb-1").await.unwrap();

        assert!(orders.try_lock("order-1").await.unwrap());
        assert_eq!(ctx.process(&entry).await.unwrap(), Processed::Busy);
        assert!(orders.is_locked("order-1"));
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_stop() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        billing.insert_bill(sample_bill("cb-2", "ba-1", &["prod-1"]));
        queue.push("cb-1").await.unwrap();
        queue.push("cb-2").await.unwrap();
        queue.push("cb-unknown").await.unwrap();

        let service = CbWorkersService::new(ctx);
        service.start().await.unwrap();
        assert!(service.is_running());

        for _ in 0..200 {
            if queue.len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.shutdown().await;
        assert!(!service.is_running());

        assert_eq!(queue.len().await.unwrap(), 0);
        let order = orders.get("order-1").await.unwrap().unwrap();
        let mut bills = order.contracts[0].bills.clone();
        bills.sort();
        assert_eq!(bills, vec!["cb-1".to_string(), "cb-2".to_string()]);
    }

    #[tokio::test]
    async fn test_busy_entry_is_retried_after_unlock() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        queue.push("cb-1").await.unwrap();
        assert!(orders.try_lock("order-1").await.unwrap());

        let service = CbWorkersService::new(ctx);
        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len().await.unwrap(), 1);

        orders.unlock("order-1").await.unwrap();
        for _ in 0..200 {
            if queue.len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.shutdown().await;

        assert_eq!(queue.len().await.unwrap(), 0);
        let order = orders.get("order-1").await.unwrap().unwrap();
        assert_eq!(order.contracts[0].bills, vec!["cb-1".to_string()]);
    }

    #[tokio::test]
    async fn test_start_releases_stale_claims() {
        let (ctx, queue, _orders, _billing) = setup().await;
        queue.push("cb-stale").await.unwrap();
        queue.claim_next().await.unwrap();

        assert_eq!(queue.reset_claimed().await.unwrap(), 1);
        assert_eq!(queue.reset_claimed().await.unwrap(), 0);

        queue.claim_next().await.unwrap();
        assert!(queue.entries()[0].in_queue);
        let service = CbWorkersService::new(ctx);
        service.start().await.unwrap();
        service.shutdown().await;

        // the unknown bill was only reachable once its stale claim was released
        assert!(queue.entries().is_empty());
    }

    #[tokio::test]
    async fn test_busy_entry_is_unmarked_when_channel_is_full() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        queue.push("cb-1").await.unwrap();
        let entry = queue.claim_next().await.unwrap().unwrap();
        assert!(orders.try_lock("order-1").await.unwrap());

        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(QueueEntry::new("cb-filler")).unwrap();
        ctx.handle(entry, &tx).await;

        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].in_queue);
        assert_eq!(rx.recv().await.unwrap().bill_id, "cb-filler");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_busy_entry_is_requeued_when_channel_has_room() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        queue.push("cb-1").await.unwrap();
        let entry = queue.claim_next().await.unwrap().unwrap();
        assert!(orders.try_lock("order-1").await.unwrap());

        let (tx, mut rx) = mpsc::channel(1);
        ctx.handle(entry.clone(), &tx).await;

        assert_eq!(rx.recv().await.unwrap().id, entry.id);
        assert!(queue.entries()[0].in_queue);
    }

    #[tokio::test]
    async fn test_upstream_error_unmarks_entry() {
        let (ctx, queue, orders, billing) = setup().await;
        billing.insert_bill(sample_bill("cb-1", "ba-1", &["prod-1"]));
        billing.fail_lookups();
        queue.push("cb-1").await.unwrap();
        let entry = queue.claim_next().await.unwrap().unwrap();

        let (tx, _rx) = mpsc::channel(1);
        ctx.handle(entry, &tx).await;

        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].in_queue);
        assert_eq!(entries[0].attempts, 1);
        let order = orders.get("order-1").await.unwrap().unwrap();
        assert!(order.contracts[0].bills.is_empty());
        assert!(!orders.is_locked("order-1"));
    }
}
