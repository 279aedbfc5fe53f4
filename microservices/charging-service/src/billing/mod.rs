//! Customer billing
//!
//! Charge lines become applied billing rates, which are aggregated into a
//! customer bill and pushed to the billing API.

mod client;

pub use client::BillingClient;

use chrono::{DateTime, Utc};
use charging_core::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Coverage;

/// One charged component as seen by the billing system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRate {
    #[serde(default)]
    pub id: String,
    pub product_id: String,
    pub billing_account_id: String,
    pub date: DateTime<Utc>,
    pub rate_type: String,
    pub name: String,
    pub tax_excluded: Money,
    pub tax_included: Money,
    pub tax_rate: Decimal,
    #[serde(default)]
    pub period: Option<Coverage>,
    #[serde(default)]
    pub is_billed: bool,
    #[serde(default)]
    pub bill_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BillState {
    New,
    PartiallyPaid,
    Settled,
    /// Voided after the payment behind it was refunded
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxItem {
    pub tax_rate: Decimal,
    pub tax_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerBill {
    #[serde(default)]
    pub id: String,
    pub billing_account_id: String,
    pub bill_date: DateTime<Utc>,
    pub state: BillState,
    pub amount_due: Money,
    pub tax_excluded: Money,
    #[serde(default)]
    pub tax_items: Vec<TaxItem>,
    #[serde(default)]
    pub billing_period: Option<Coverage>,
    #[serde(default)]
    pub rate_ids: Vec<String>,
    /// Products the bill charges for
    #[serde(default)]
    pub product_ids: Vec<String>,
}
