//! Billing Client

use chrono::{DateTime, Utc};
use charging_core::{ChargingError, Money, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{AppliedRate, BillState, CustomerBill, TaxItem};
use crate::clients::BillingApi;
use crate::types::{ChargeLine, Contract, Coverage, Order};

#[derive(Clone)]
pub struct BillingClient {
    api: Arc<dyn BillingApi>,
}

impl BillingClient {
    pub fn new(api: Arc<dyn BillingApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn BillingApi> {
        &self.api
    }

    /// One applied rate per charge line of the contract
    pub fn applied_rates(
        order: &Order,
        contract: &Contract,
        lines: &[ChargeLine],
        now: DateTime<Utc>,
    ) -> Result<Vec<AppliedRate>> {
        let billing_account_id = order.billing_account_id.clone().ok_or_else(|| {
            ChargingError::Validation(format!("order {} has no billing account", order.id))
        })?;

        Ok(lines
            .iter()
            .filter(|line| line.item_id == contract.item_id)
            .map(|line| AppliedRate {
                id: String::new(),
                product_id: contract.product_id.clone(),
                billing_account_id: billing_account_id.clone(),
                date: now,
                rate_type: line.price_type.as_str().to_string(),
                name: line.name.clone(),
                tax_excluded: Money::new(line.duty_free, line.currency.clone()),
                tax_included: Money::new(line.tax_included, line.currency.clone()),
                tax_rate: line.tax_rate,
                period: line.coverage,
                is_billed: false,
                bill_id: None,
            })
            .collect())
    }

    /// Aggregate applied rates into a single customer bill
    pub fn aggregate(
        billing_account_id: &str,
        rates: &[AppliedRate],
        state: BillState,
        now: DateTime<Utc>,
    ) -> Result<CustomerBill> {
        let first = rates
            .first()
            .ok_or_else(|| ChargingError::Validation("cannot bill an empty set of rates".into()))?;
        let currency = first.tax_included.unit.clone();

        let mut amount_due = Decimal::ZERO;
        let mut tax_excluded = Decimal::ZERO;
        let mut by_rate: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        let mut period: Option<Coverage> = None;
        let mut product_ids: Vec<String> = Vec::new();

        for rate in rates {
            if rate.tax_included.unit != currency || rate.tax_excluded.unit != currency {
                return Err(ChargingError::Validation(format!(
                    "cannot bill {} and {} on the same customer bill",
                    currency, rate.tax_included.unit
                )));
            }

            amount_due += rate.tax_included.value;
            tax_excluded += rate.tax_excluded.value;
            *by_rate.entry(rate.tax_rate.normalize()).or_default() +=
                rate.tax_included.value - rate.tax_excluded.value;

            if let Some(covered) = rate.period {
                period = Some(period.map_or(covered, |p| p.union(covered)));
            }
            if !product_ids.contains(&rate.product_id) {
                product_ids.push(rate.product_id.clone());
            }
        }

        Ok(CustomerBill {
            id: String::new(),
            billing_account_id: billing_account_id.to_string(),
            bill_date: now,
            state,
            amount_due: Money::new(amount_due, currency.clone()),
            tax_excluded: Money::new(tax_excluded, currency.clone()),
            tax_items: by_rate
                .into_iter()
                .map(|(tax_rate, amount)| TaxItem {
                    tax_rate,
                    tax_amount: Money::new(amount, currency.clone()),
                })
                .collect(),
            billing_period: period,
            rate_ids: rates.iter().map(|r| r.id.clone()).filter(|id| !id.is_empty()).collect(),
            product_ids,
        })
    }

    /// Create rates and the customer bill for a contract's charge lines
    #[instrument(skip(self, order, contract, lines), fields(order_id = %order.id, item_id = %contract.item_id))]
    pub async fn bill(
        &self,
        order: &Order,
        contract: &Contract,
        lines: &[ChargeLine],
        paid: bool,
    ) -> Result<CustomerBill> {
        let now = Utc::now();
        let rates = Self::applied_rates(order, contract, lines, now)?;

        let mut stored = Vec::with_capacity(rates.len());
        for rate in &rates {
            stored.push(self.api.create_applied_rate(rate).await?);
        }

        let state = if paid { BillState::Settled } else { BillState::New };
        let account = stored
            .first()
            .map(|r| r.billing_account_id.clone())
            .unwrap_or_default();
        let bill = Self::aggregate(&account, &stored, state, now)?;
        let created = self.api.create_customer_bill(&bill).await?;

        for mut rate in stored {
            rate.is_billed = true;
            rate.bill_id = Some(created.id.clone());
            self.api.update_applied_rate(&rate).await?;
        }

        info!(
            bill_id = %created.id,
            amount_due = %created.amount_due,
            "Customer bill created"
        );
        Ok(created)
    }

    /// Cancel bills whose payment did not go through; failures are logged only
    pub async fn void(&self, bill_ids: &[String]) {
        for bill_id in bill_ids {
            match self.api.set_bill_state(bill_id, BillState::Cancelled).await {
                Ok(()) => warn!(bill_id = %bill_id, "Customer bill voided"),
                Err(e) => error!(bill_id = %bill_id, error = %e, "Could not void customer bill"),
            }
        }
    }
}
