//! Incoming order requests

use charging_core::{ChargingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

use crate::pricing::{ItemCharacteristic, PriceItem, PriceRequest, TailoredPrice};

/// Product order as received from the ordering API
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "unique_item_ids"))]
pub struct OrderRequest {
    #[validate(length(min = 1, max = 128))]
    pub id: String,

    #[validate(length(min = 1))]
    pub customer_id: String,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub billing_account_id: Option<String>,

    #[validate(length(min = 1), nested)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(default = "default_action")]
    #[validate(custom(function = "add_only"))]
    pub action: String,

    #[validate(length(min = 1))]
    pub offering_id: String,

    #[validate(length(min = 1))]
    pub product_id: String,

    #[serde(default = "default_quantity")]
    #[validate(range(min = 1))]
    pub quantity: u32,

    #[serde(default)]
    pub characteristics: Vec<ItemCharacteristic>,

    #[serde(default)]
    pub price_plan_id: Option<String>,

    #[serde(default)]
    pub tailored: Vec<TailoredPrice>,
}

fn default_action() -> String {
    "add".to_string()
}

fn default_quantity() -> u32 {
    1
}

fn add_only(action: &str) -> std::result::Result<(), ValidationError> {
    if action.eq_ignore_ascii_case("add") {
        Ok(())
    } else {
        let mut err = ValidationError::new("unsupported_action");
        err.message = Some(format!("only 'add' items can be charged, got '{}'", action).into());
        Err(err)
    }
}

fn unique_item_ids(request: &OrderRequest) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    match request.items.iter().find(|item| !seen.insert(item.id.as_str())) {
        None => Ok(()),
        Some(dup) => {
            let mut err = ValidationError::new("duplicate_item");
            err.message = Some(format!("item id '{}' appears more than once", dup.id).into());
            Err(err)
        }
    }
}

impl OrderRequest {
    /// Run the declarative checks, reporting them as one validation error
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| ChargingError::Validation(errors.to_string()))
    }

    pub fn price_request(&self) -> PriceRequest {
        PriceRequest {
            items: self
                .items
                .iter()
                .map(|item| PriceItem {
                    id: item.id.clone(),
                    offering_id: item.offering_id.clone(),
                    quantity: item.quantity,
                    characteristics: item.characteristics.clone(),
                    price_plan_id: item.price_plan_id.clone(),
                    tailored: item.tailored.clone(),
                })
                .collect(),
            billing_account_id: self.billing_account_id.clone(),
        }
    }

    pub fn item(&self, id: &str) -> Option<&OrderItemRequest> {
        self.items.iter().find(|item| item.id == id)
    }
}
