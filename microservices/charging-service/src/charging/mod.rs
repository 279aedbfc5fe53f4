//! Charging pipeline
//!
//! A pricing backend turns an order's contracts into charge lines, the
//! [`Engine`] collects the money through a payment gateway when the lines are
//! not free, and the paid lines are recorded on the contracts and billed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use charging_core::Result;
use serde::Serialize;

use crate::pricing::UsageRecord;
use crate::types::{ChargeKind, ChargeLine, Order};

mod engine;
mod local;
mod remote;

pub use engine::Engine;
pub use local::LocalEngine;
pub use remote::RemoteEngine;

/// Result of starting a charge
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChargingOutcome {
    /// Nothing had to be paid online; the charge is already recorded
    Completed { order: Order },
    /// The customer must approve the payment at `url`
    Redirect { url: String, reference: String },
}

/// Rates the contracts of an order
#[async_trait]
pub trait PricingBackend: Send + Sync {
    fn backend_id(&self) -> &'static str;

    /// Charge lines for the selected items; every contract when `item_ids` is empty
    async fn rate(
        &self,
        order: &Order,
        kind: ChargeKind,
        item_ids: &[String],
        usages: &[UsageRecord],
        now: DateTime<Utc>,
    ) -> Result<Vec<ChargeLine>>;
}

/// Whether `item_ids` selects the contract of `item_id`
pub(crate) fn selected(item_ids: &[String], item_id: &str) -> bool {
    item_ids.is_empty() || item_ids.iter().any(|id| id == item_id)
}
