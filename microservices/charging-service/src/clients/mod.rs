//! Clients for the sibling marketplace APIs
//!
//! Each API is reached through a narrow trait so the charging logic can run
//! against the HTTP implementation in production and in-memory doubles in tests.

use async_trait::async_trait;
use charging_core::Result;
use serde::{Deserialize, Serialize};

use crate::billing::{AppliedRate, BillState, CustomerBill};
use crate::pricing::{ProductOffering, ProductOfferingPrice};

mod http;

pub use http::HttpClients;

/// Postal characteristics of a contact medium
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumCharacteristic {
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMedium {
    #[serde(default)]
    pub medium_type: String,
    #[serde(default)]
    pub characteristic: MediumCharacteristic,
}

/// Billing account, reduced to what VAT resolution reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub contact_medium: Vec<ContactMedium>,
}

impl BillingAccount {
    /// Country of the postal address, else of any contact medium that has one
    pub fn country(&self) -> Option<&str> {
        let postal = self
            .contact_medium
            .iter()
            .filter(|m| m.medium_type.eq_ignore_ascii_case("PostalAddress"));
        let others = self.contact_medium.iter();

        postal
            .chain(others)
            .find_map(|m| m.characteristic.country.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_offering(&self, id: &str) -> Result<ProductOffering>;
    async fn get_price(&self, id: &str) -> Result<ProductOfferingPrice>;
}

#[async_trait]
pub trait PartyApi: Send + Sync {
    async fn get_billing_account(&self, id: &str) -> Result<BillingAccount>;
}

#[async_trait]
pub trait InventoryApi: Send + Sync {
    async fn activate_product(&self, product_id: &str) -> Result<()>;
}

#[async_trait]
pub trait OrderingApi: Send + Sync {
    async fn set_item_state(&self, order_id: &str, item_id: &str, state: &str) -> Result<()>;
}

#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn create_applied_rate(&self, rate: &AppliedRate) -> Result<AppliedRate>;
    async fn update_applied_rate(&self, rate: &AppliedRate) -> Result<()>;
    async fn create_customer_bill(&self, bill: &CustomerBill) -> Result<CustomerBill>;
    async fn set_bill_state(&self, id: &str, state: BillState) -> Result<()>;
    async fn get_customer_bill(&self, id: &str) -> Result<Option<CustomerBill>>;
}
