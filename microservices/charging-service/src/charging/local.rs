//! In-process rating of stored contract components

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use charging_core::{round_money, ChargePeriod, ChargingError, Result};
use rust_decimal::Decimal;

use super::{selected, PricingBackend};
use crate::pricing::{ComponentPrice, PriceEngine, PriceType, UsageRecord};
use crate::types::{ChargeKind, ChargeLine, Contract, Coverage, Order};

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEngine;

impl LocalEngine {
    pub fn new() -> Self {
        Self
    }

    fn line(contract: &Contract, component: &ComponentPrice, periods: u32, coverage: Option<Coverage>) -> ChargeLine {
        let factor = Decimal::from(periods.max(1));
        ChargeLine {
            item_id: contract.item_id.clone(),
            component_id: component.component_id.clone(),
            name: component.name.clone(),
            price_type: component.price_type,
            periods,
            duty_free: round_money(component.duty_free * factor),
            tax_rate: component.tax_rate,
            tax_included: round_money(component.tax_included * factor),
            currency: component.currency.clone(),
            coverage,
        }
    }

    /// One-time fees plus the first prepaid period
    fn initial(contract: &Contract, now: DateTime<Utc>) -> Vec<ChargeLine> {
        contract
            .components
            .iter()
            .filter_map(|component| match component.price_type {
                PriceType::OneTime => Some(Self::line(contract, component, 0, None)),
                PriceType::RecurringPrepaid => {
                    let period = component.period.or(contract.period)?;
                    let (start, end) = period.coverage(now, 1);
                    Some(Self::line(contract, component, 1, Some(Coverage::new(start, end))))
                }
                _ => None,
            })
            .collect()
    }

    /// Periods elapsed since the last accounted period.
    ///
    /// Postpaid components pay for the elapsed periods themselves, prepaid ones
    /// for the same number of periods one period ahead.
    fn renovation(contract: &Contract, period: ChargePeriod, now: DateTime<Utc>) -> Vec<ChargeLine> {
        let last = contract.last_charge.unwrap_or(now);
        let periods = period.periods_elapsed(last, now).max(1);

        contract
            .components
            .iter()
            .filter_map(|component| {
                let coverage = match component.price_type {
                    PriceType::Recurring => Coverage::new(last, period.advance(last, periods)),
                    PriceType::RecurringPrepaid => {
                        Coverage::new(period.advance(last, 1), period.advance(last, periods + 1))
                    }
                    _ => return None,
                };
                Some(Self::line(contract, component, periods, Some(coverage)))
            })
            .collect()
    }

    fn usage(contract: &Contract, usages: &[UsageRecord]) -> Result<Vec<ChargeLine>> {
        let rated = PriceEngine::calculate_usage(&contract.components, usages)?;
        Ok(rated
            .iter()
            .map(|component| Self::line(contract, component, 0, None))
            .collect())
    }
}

#[async_trait]
impl PricingBackend for LocalEngine {
    fn backend_id(&self) -> &'static str {
        "local"
    }

    async fn rate(
        &self,
        order: &Order,
        kind: ChargeKind,
        item_ids: &[String],
        usages: &[UsageRecord],
        now: DateTime<Utc>,
    ) -> Result<Vec<ChargeLine>> {
        let mut lines = Vec::new();

        for contract in order.contracts.iter().filter(|c| selected(item_ids, &c.item_id)) {
            match kind {
                ChargeKind::Initial => lines.extend(Self::initial(contract, now)),
                ChargeKind::Renovation => {
                    let Some(period) = contract.period else {
                        continue;
                    };
                    if contract.renovation_due(now) {
                        lines.extend(Self::renovation(contract, period, now));
                    }
                }
                ChargeKind::Usage => {
                    if !contract.has_usage() && !item_ids.is_empty() {
                        return Err(ChargingError::Validation(format!(
                            "item {} has no usage components",
                            contract.item_id
                        )));
                    }
                    lines.extend(Self::usage(contract, usages)?);
                }
            }
        }

        Ok(lines)
    }
}
