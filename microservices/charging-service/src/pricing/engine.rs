//! Price Engine
//!
//! Turns ordered items into priced components:
//! - price plan selection and bundle expansion against the catalog
//! - conditional components keyed on selected product characteristics
//! - tailored (negotiated) prices and percentage discounts
//! - VAT resolution and order-level totals

use charging_core::{round_money, ChargingError, Result};
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::model::{
    ComponentPrice, ItemCharacteristic, ItemPrice, OrderTotal, PriceItem, PriceRequest,
    PriceResponse, PriceType, ProductOfferingPrice, UsageRecord,
};
use super::tax::TaxResolver;
use crate::clients::CatalogApi;

/// Deepest bundle nesting accepted from the catalog
pub const MAX_BUNDLE_DEPTH: usize = 5;

#[derive(Clone)]
pub struct PriceEngine {
    catalog: Arc<dyn CatalogApi>,
    tax: TaxResolver,
}

impl PriceEngine {
    pub fn new(catalog: Arc<dyn CatalogApi>, tax: TaxResolver) -> Self {
        Self { catalog, tax }
    }

    /// Price every item of a request and aggregate the order totals
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn calculate_prices(&self, request: &PriceRequest) -> Result<PriceResponse> {
        let tax_rate = self.tax.resolve(request.billing_account_id.as_deref()).await?;

        let items = try_join_all(request.items.iter().map(|item| async move {
            Ok::<_, ChargingError>(ItemPrice {
                item_id: item.id.clone(),
                components: self.price_item(item, tax_rate).await?,
            })
        }))
        .await?;

        let totals = Self::totals(&items);
        debug!(totals = totals.len(), %tax_rate, "Order priced");

        Ok(PriceResponse {
            tax_rate,
            items,
            totals,
        })
    }

    /// Priced components of a single item
    pub async fn price_item(&self, item: &PriceItem, tax_rate: Decimal) -> Result<Vec<ComponentPrice>> {
        if item.quantity == 0 {
            return Err(ChargingError::Validation(format!(
                "item {} must have a quantity of at least 1",
                item.id
            )));
        }

        let Some(plan) = self.select_plan(item).await? else {
            return Ok(Vec::new());
        };

        let catalog_components = self.expand(plan).await?;
        let selected: Vec<ProductOfferingPrice> = catalog_components
            .into_iter()
            .filter(|pop| conditions_met(pop, &item.characteristics))
            .collect();

        build_components(item, &selected, tax_rate)
    }

    async fn select_plan(&self, item: &PriceItem) -> Result<Option<ProductOfferingPrice>> {
        let offering = self.catalog.get_offering(&item.offering_id).await?;
        let refs = &offering.product_offering_price;

        let plan_id = match (&item.price_plan_id, refs.len()) {
            (Some(selected), _) => {
                if !refs.iter().any(|r| &r.id == selected) {
                    return Err(ChargingError::Validation(format!(
                        "price plan {} does not belong to offering {}",
                        selected, offering.id
                    )));
                }
                selected.clone()
            }
            (None, 0) => return Ok(None),
            (None, 1) => refs[0].id.clone(),
            (None, _) => {
                return Err(ChargingError::Validation(format!(
                    "a price plan must be selected for item {}",
                    item.id
                )))
            }
        };

        Ok(Some(self.catalog.get_price(&plan_id).await?))
    }

    /// Flatten a plan into its leaf components, keeping catalog order.
    ///
    /// A component may appear under several bundles; only a bundle that
    /// contains itself on its own path is rejected.
    async fn expand(&self, plan: ProductOfferingPrice) -> Result<Vec<ProductOfferingPrice>> {
        let mut stack = vec![(plan, Vec::<String>::new())];
        let mut leaves = Vec::new();

        while let Some((pop, ancestors)) = stack.pop() {
            if !pop.is_bundle {
                leaves.push(pop);
                continue;
            }
            if ancestors.len() >= MAX_BUNDLE_DEPTH {
                return Err(ChargingError::Validation(format!(
                    "price bundle {} is nested too deeply",
                    pop.id
                )));
            }

            let mut path = ancestors;
            path.push(pop.id.clone());

            let mut children = Vec::with_capacity(pop.bundled_pop_relationship.len());
            for child_ref in &pop.bundled_pop_relationship {
                if path.contains(&child_ref.id) {
                    return Err(ChargingError::Validation(format!(
                        "price bundle {} contains itself through {}",
                        child_ref.id, pop.id
                    )));
                }
                children.push(self.catalog.get_price(&child_ref.id).await?);
            }
            stack.extend(children.into_iter().rev().map(|child| (child, path.clone())));
        }

        Ok(leaves)
    }

    /// Rate usage components against metered quantities.
    ///
    /// Units are compared case-insensitively; components without a matching
    /// record produce nothing.
    pub fn calculate_usage(components: &[ComponentPrice], usages: &[UsageRecord]) -> Result<Vec<ComponentPrice>> {
        let mut rated = Vec::new();

        for component in components.iter().filter(|c| c.price_type == PriceType::Usage) {
            let Some(unit) = component.unit_of_measure.as_deref() else {
                continue;
            };
            let consumed: Decimal = usages
                .iter()
                .filter(|u| u.unit_of_measure.eq_ignore_ascii_case(unit))
                .map(|u| u.quantity)
                .sum();

            if consumed < Decimal::ZERO {
                return Err(ChargingError::Validation(format!(
                    "negative usage reported for unit {}",
                    unit
                )));
            }
            if consumed.is_zero() {
                continue;
            }

            let duty_free = component.unit_price * consumed;
            rated.push(ComponentPrice {
                duty_free: round_money(duty_free),
                tax_included: round_money(with_tax(duty_free, component.tax_rate)),
                ..component.clone()
            });
        }

        Ok(rated)
    }

    /// Sum components across items by type, period, unit and currency
    pub fn totals(items: &[ItemPrice]) -> Vec<OrderTotal> {
        let mut totals: Vec<OrderTotal> = Vec::new();

        for component in items.iter().flat_map(|i| i.components.iter()) {
            let existing = totals.iter_mut().find(|t| {
                t.price_type == component.price_type
                    && t.period == component.period
                    && t.unit_of_measure == component.unit_of_measure
                    && t.currency == component.currency
            });

            match existing {
                Some(total) => {
                    total.duty_free += component.duty_free;
                    total.tax_included += component.tax_included;
                }
                None => totals.push(OrderTotal {
                    price_type: component.price_type,
                    period: component.period,
                    unit_of_measure: component.unit_of_measure.clone(),
                    currency: component.currency.clone(),
                    duty_free: component.duty_free,
                    tax_included: component.tax_included,
                }),
            }
        }

        totals
    }
}

fn with_tax(duty_free: Decimal, tax_rate: Decimal) -> Decimal {
    duty_free * (Decimal::ONE + tax_rate / Decimal::ONE_HUNDRED)
}

/// A component applies when every condition matches a selected characteristic
fn conditions_met(pop: &ProductOfferingPrice, selected: &[ItemCharacteristic]) -> bool {
    pop.prod_spec_char_value_use.iter().all(|condition| {
        selected.iter().any(|ch| {
            ch.name.eq_ignore_ascii_case(&condition.name)
                && condition.values.iter().any(|v| v == &ch.value)
        })
    })
}

fn build_components(
    item: &PriceItem,
    selected: &[ProductOfferingPrice],
    tax_rate: Decimal,
) -> Result<Vec<ComponentPrice>> {
    let discount_factor = selected
        .iter()
        .filter(|pop| pop.price_type == PriceType::Discount)
        .filter_map(|pop| pop.percentage)
        .try_fold(Decimal::ONE, |factor, pct| {
            if pct < Decimal::ZERO {
                return Err(ChargingError::Validation("discount percentage cannot be negative".into()));
            }
            let pct = pct.min(Decimal::ONE_HUNDRED);
            Ok(factor * (Decimal::ONE - pct / Decimal::ONE_HUNDRED))
        })?;

    let quantity = Decimal::from(item.quantity);
    let mut components = Vec::new();

    for pop in selected.iter().filter(|pop| pop.price_type != PriceType::Discount) {
        let tailored = item.tailored.iter().find(|t| t.component_id == pop.id);
        let price = match (tailored, &pop.price) {
            (Some(t), _) => t.price.clone(),
            (None, Some(p)) => p.clone(),
            (None, None) => {
                return Err(ChargingError::Validation(format!(
                    "price component {} has no price",
                    pop.id
                )))
            }
        };
        if price.value < Decimal::ZERO {
            return Err(ChargingError::Validation(format!(
                "price component {} has a negative price",
                pop.id
            )));
        }

        let unit_price = if pop.price_type == PriceType::Usage {
            price.value
        } else {
            price.value * discount_factor
        };

        // usage amounts are per unit; quantity only scales flat fees
        let duty_free = match pop.price_type {
            PriceType::Usage => unit_price,
            _ => unit_price * quantity,
        };

        components.push(ComponentPrice {
            component_id: pop.id.clone(),
            name: pop.name.clone(),
            price_type: pop.price_type,
            period: pop.period()?,
            unit_of_measure: pop.unit_of_measure.clone(),
            unit_price,
            quantity: item.quantity,
            duty_free: round_money(duty_free),
            tax_rate,
            tax_included: round_money(with_tax(duty_free, tax_rate)),
            currency: price.unit,
        });
    }

    Ok(components)
}
