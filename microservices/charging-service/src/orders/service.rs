//! Order intake: price, persist and start the initial charge

use chrono::Utc;
use charging_core::{ChargePeriod, ChargingError, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{OrderRequest, OrderStore};
use crate::charging::{ChargingOutcome, Engine};
use crate::pricing::{ComponentPrice, PriceEngine};
use crate::types::{ChargeKind, Contract, Order, OrderState};

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    prices: Arc<PriceEngine>,
    engine: Arc<Engine>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, prices: Arc<PriceEngine>, engine: Arc<Engine>) -> Self {
        Self { orders, prices, engine }
    }

    pub async fn get(&self, id: &str) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| ChargingError::NotFound(format!("order {}", id)))
    }

    /// Create the order and start its initial charge.
    ///
    /// An order whose initial charge cannot be started is kept, marked failed.
    #[instrument(skip(self, request), fields(order_id = %request.id))]
    pub async fn create(&self, request: OrderRequest) -> Result<ChargingOutcome> {
        request.check()?;

        let priced = self.prices.calculate_prices(&request.price_request()).await?;
        if !priced.is_free() && request.billing_account_id.is_none() {
            return Err(ChargingError::Validation(
                "a billing account is required for priced orders".into(),
            ));
        }

        let mut contracts = Vec::with_capacity(priced.items.len());
        for item in priced.items {
            let Some(ordered) = request.item(&item.item_id) else {
                continue;
            };
            contracts.push(Contract {
                item_id: item.item_id.clone(),
                product_id: ordered.product_id.clone(),
                offering_id: ordered.offering_id.clone(),
                period: contract_period(&item.item_id, &item.components)?,
                components: item.components,
                last_charge: None,
                next_charge: None,
                charges: Vec::new(),
                bills: Vec::new(),
            });
        }

        let now = Utc::now();
        let order = Order {
            id: request.id.clone(),
            customer_id: request.customer_id.clone(),
            billing_account_id: request.billing_account_id.clone(),
            state: OrderState::Pending,
            contracts,
            pending_payment: None,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(&order).await?;
        info!(contracts = order.contracts.len(), tax_rate = %priced.tax_rate, "Order stored");

        match self.engine.resolve_charging(&order.id, ChargeKind::Initial, &[], &[]).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "Initial charge failed");
                if let Err(mark_err) = self.engine.fail_order(&order.id).await {
                    warn!(error = %mark_err, "Could not mark order failed");
                }
                Err(e)
            }
        }
    }
}

/// The one period shared by every recurring component of an item
fn contract_period(item_id: &str, components: &[ComponentPrice]) -> Result<Option<ChargePeriod>> {
    let mut periods = components
        .iter()
        .filter(|c| c.price_type.is_recurring())
        .map(|c| c.period.unwrap_or_else(ChargePeriod::monthly));

    let Some(first) = periods.next() else {
        return Ok(None);
    };
    if let Some(other) = periods.find(|p| *p != first) {
        return Err(ChargingError::Validation(format!(
            "item {} mixes charge periods {} and {}",
            item_id, first, other
        )));
    }
    Ok(Some(first))
}
