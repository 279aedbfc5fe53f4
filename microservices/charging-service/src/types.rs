//! Order, contract and charge types

use chrono::{DateTime, Utc};
use charging_core::ChargePeriod;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::billing::CustomerBill;
use crate::pricing::{ComponentPrice, PriceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Why money is being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeKind {
    Initial,
    Renovation,
    Usage,
}

impl ChargeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Renovation => "renovation",
            Self::Usage => "usage",
        }
    }
}

/// Interval of service a charge pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Coverage {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Smallest interval containing both
    pub fn union(self, other: Coverage) -> Coverage {
        Coverage {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// One rated price component of one contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeLine {
    pub item_id: String,
    pub component_id: String,
    pub name: String,
    pub price_type: PriceType,
    /// Recurring periods paid by this line; zero for non-recurring lines
    pub periods: u32,
    pub duty_free: Decimal,
    pub tax_rate: Decimal,
    pub tax_included: Decimal,
    pub currency: String,
    #[serde(default)]
    pub coverage: Option<Coverage>,
}

/// Collected payment recorded on a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub date: DateTime<Utc>,
    pub concept: ChargeKind,
    pub amount: Decimal,
    pub duty_free: Decimal,
    pub currency: String,
    #[serde(default)]
    pub coverage: Option<Coverage>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub bill_id: Option<String>,
}

/// Pricing agreement for one ordered product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub item_id: String,
    pub product_id: String,
    pub offering_id: String,
    pub components: Vec<ComponentPrice>,
    /// Charge period shared by every recurring component
    #[serde(default)]
    pub period: Option<ChargePeriod>,
    /// Start of the first period not yet accounted for
    #[serde(default)]
    pub last_charge: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_charge: Option<DateTime<Utc>>,
    #[serde(default)]
    pub charges: Vec<Charge>,
    #[serde(default)]
    pub bills: Vec<String>,
}

impl Contract {
    pub fn is_recurring(&self) -> bool {
        self.period.is_some()
    }

    pub fn renovation_due(&self, now: DateTime<Utc>) -> bool {
        self.is_recurring() && self.next_charge.map_or(false, |next| next <= now)
    }

    pub fn has_usage(&self) -> bool {
        self.components.iter().any(|c| c.price_type == PriceType::Usage)
    }

    /// Attach a customer bill; returns false when it was already known
    pub fn register_bill(&mut self, bill: &CustomerBill) -> bool {
        if self.bills.iter().any(|id| id == &bill.id) {
            return false;
        }
        self.bills.push(bill.id.clone());
        for charge in self.charges.iter_mut().filter(|c| c.bill_id.is_none()) {
            charge.bill_id = Some(bill.id.clone());
        }
        true
    }
}

/// Payment started with a gateway and awaiting the customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    pub reference: String,
    pub kind: ChargeKind,
    pub lines: Vec<ChargeLine>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub billing_account_id: Option<String>,
    pub state: OrderState,
    pub contracts: Vec<Contract>,
    #[serde(default)]
    pub pending_payment: Option<PendingPayment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn contract(&self, item_id: &str) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.item_id == item_id)
    }

    pub fn contract_mut(&mut self, item_id: &str) -> Option<&mut Contract> {
        self.contracts.iter_mut().find(|c| c.item_id == item_id)
    }

    /// True when one of the contracts covers any of the products
    pub fn owns_any_product(&self, product_ids: &[String]) -> bool {
        self.contracts
            .iter()
            .any(|c| product_ids.iter().any(|p| p == &c.product_id))
    }

    /// Register a bill on every contract whose product it references
    pub fn register_bill(&mut self, bill: &CustomerBill) -> bool {
        let mut changed = false;
        for contract in self
            .contracts
            .iter_mut()
            .filter(|c| bill.product_ids.iter().any(|p| p == &c.product_id))
        {
            changed |= contract.register_bill(bill);
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}
