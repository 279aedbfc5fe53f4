//! Customer-bill notification queue

mod store;
mod workers;

pub use store::{MemoryQueueStore, PgQueueStore, QueueEntry, QueueStore};
pub use workers::{CbWorker, CbWorkersService, Processed};
