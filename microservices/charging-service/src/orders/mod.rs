//! Orders: intake, validation and storage

mod service;
mod store;
mod validation;

pub use service::OrderService;
pub use store::{MemoryOrderStore, OrderStore, PgOrderStore};
pub use validation::{OrderItemRequest, OrderRequest};
