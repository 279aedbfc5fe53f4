//! Pricing types: catalog price components in, priced components out

use charging_core::{ChargePeriod, ChargingError, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a price component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PriceType {
    OneTime,
    /// Postpaid: charged once each period has elapsed
    Recurring,
    /// Charged at the start of each period
    RecurringPrepaid,
    Usage,
    Discount,
}

impl PriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one time",
            Self::Recurring => "recurring",
            Self::RecurringPrepaid => "recurring-prepaid",
            Self::Usage => "usage",
            Self::Discount => "discount",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Recurring | Self::RecurringPrepaid)
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceType {
    type Err = ChargingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "one time" | "onetime" | "single payment" => Ok(Self::OneTime),
            "recurring" | "recurring postpaid" => Ok(Self::Recurring),
            "recurring prepaid" => Ok(Self::RecurringPrepaid),
            "usage" | "pay per use" => Ok(Self::Usage),
            "discount" => Ok(Self::Discount),
            _ => Err(ChargingError::Validation(format!("unknown price type '{}'", s))),
        }
    }
}

impl TryFrom<String> for PriceType {
    type Error = ChargingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PriceType> for String {
    fn from(value: PriceType) -> Self {
        value.as_str().to_string()
    }
}

/// Reference to another catalog resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Catalog product offering, reduced to what pricing reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductOffering {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub product_offering_price: Vec<ResourceRef>,
}

/// Condition on a selected product characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicCondition {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Catalog price component or price plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductOfferingPrice {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub price_type: PriceType,
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub percentage: Option<Decimal>,
    #[serde(default)]
    pub recurring_charge_period_type: Option<String>,
    #[serde(default)]
    pub recurring_charge_period_length: Option<u32>,
    #[serde(default)]
    pub unit_of_measure: Option<String>,
    #[serde(default)]
    pub is_bundle: bool,
    #[serde(default)]
    pub bundled_pop_relationship: Vec<ResourceRef>,
    #[serde(default)]
    pub prod_spec_char_value_use: Vec<CharacteristicCondition>,
}

impl ProductOfferingPrice {
    /// Charge period of a recurring component, monthly when unspecified
    pub fn period(&self) -> Result<Option<ChargePeriod>, ChargingError> {
        if !self.price_type.is_recurring() {
            return Ok(None);
        }
        let mut period = match &self.recurring_charge_period_type {
            Some(raw) => raw.parse::<ChargePeriod>()?,
            None => ChargePeriod::monthly(),
        };
        if let Some(length) = self.recurring_charge_period_length {
            if length == 0 {
                return Err(ChargingError::Validation(format!(
                    "price component {} has a zero-length period",
                    self.id
                )));
            }
            period = ChargePeriod::new(period.unit, length);
        }
        Ok(Some(period))
    }
}

/// Characteristic value chosen for an ordered product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCharacteristic {
    pub name: String,
    pub value: String,
}

/// Negotiated price replacing a catalog component's value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailoredPrice {
    pub component_id: String,
    pub price: Money,
}

fn default_quantity() -> u32 {
    1
}

/// One line to be priced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceItem {
    pub id: String,
    pub offering_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub characteristics: Vec<ItemCharacteristic>,
    #[serde(default)]
    pub price_plan_id: Option<String>,
    #[serde(default)]
    pub tailored: Vec<TailoredPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub items: Vec<PriceItem>,
    #[serde(default)]
    pub billing_account_id: Option<String>,
}

/// A price component after selection, tailoring, discounts and VAT.
///
/// For usage components the amounts are per unit of measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPrice {
    pub component_id: String,
    pub name: String,
    pub price_type: PriceType,
    #[serde(default)]
    pub period: Option<ChargePeriod>,
    #[serde(default)]
    pub unit_of_measure: Option<String>,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub duty_free: Decimal,
    pub tax_rate: Decimal,
    pub tax_included: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPrice {
    pub item_id: String,
    pub components: Vec<ComponentPrice>,
}

/// Order-level sum of components sharing type, period, unit and currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotal {
    pub price_type: PriceType,
    pub period: Option<ChargePeriod>,
    pub unit_of_measure: Option<String>,
    pub currency: String,
    pub duty_free: Decimal,
    pub tax_included: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub tax_rate: Decimal,
    pub items: Vec<ItemPrice>,
    pub totals: Vec<OrderTotal>,
}

impl PriceResponse {
    /// True when nothing in the order costs money
    pub fn is_free(&self) -> bool {
        self.totals.iter().all(|t| t.tax_included.is_zero())
    }
}

/// Metered consumption reported for a contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub unit_of_measure: String,
    pub quantity: Decimal,
}
