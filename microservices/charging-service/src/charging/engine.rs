//! Charging engine
//!
//! Every operation runs under the order lock held in the order store; the
//! lock is released whatever the outcome.

use chrono::{DateTime, Utc};
use charging_core::{ChargingError, Money, Result};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{selected, ChargingOutcome, PricingBackend};
use crate::billing::BillingClient;
use crate::clients::{InventoryApi, OrderingApi};
use crate::orders::OrderStore;
use crate::payment::{PaymentGateway, PaymentRequest};
use crate::pricing::UsageRecord;
use crate::types::{Charge, ChargeKind, ChargeLine, Contract, Coverage, Order, OrderState, PendingPayment};

pub struct Engine {
    orders: Arc<dyn OrderStore>,
    backend: Arc<dyn PricingBackend>,
    gateway: Arc<dyn PaymentGateway>,
    billing: BillingClient,
    inventory: Arc<dyn InventoryApi>,
    ordering: Arc<dyn OrderingApi>,
    site_url: String,
}

impl Engine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        backend: Arc<dyn PricingBackend>,
        gateway: Arc<dyn PaymentGateway>,
        billing: BillingClient,
        inventory: Arc<dyn InventoryApi>,
        ordering: Arc<dyn OrderingApi>,
        site_url: &str,
    ) -> Self {
        Self {
            orders,
            backend,
            gateway,
            billing,
            inventory,
            ordering,
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn backend_id(&self) -> &'static str {
        self.backend.backend_id()
    }

    pub fn gateway_id(&self) -> &'static str {
        self.gateway.gateway_id()
    }

    /// Run `work` while holding the order lock
    async fn locked<T, F>(&self, order_id: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.orders.try_lock(order_id).await? {
            return Err(ChargingError::Conflict(format!(
                "order {} is being processed",
                order_id
            )));
        }

        let result = work.await;

        if let Err(e) = self.orders.unlock(order_id).await {
            error!(order_id = %order_id, error = %e, "Failed to release order lock");
        }
        result
    }

    async fn load(&self, order_id: &str) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| ChargingError::NotFound(format!("order {}", order_id)))
    }

    /// Rate the selected items and collect the money.
    ///
    /// Free charges are recorded at once; anything else starts a redirection
    /// payment that [`Engine::end_charging`] completes.
    #[instrument(skip(self, item_ids, usages), fields(kind = kind.as_str()))]
    pub async fn resolve_charging(
        &self,
        order_id: &str,
        kind: ChargeKind,
        item_ids: &[String],
        usages: &[UsageRecord],
    ) -> Result<ChargingOutcome> {
        self.locked(order_id, self.resolve_locked(order_id, kind, item_ids, usages))
            .await
    }

    async fn resolve_locked(
        &self,
        order_id: &str,
        kind: ChargeKind,
        item_ids: &[String],
        usages: &[UsageRecord],
    ) -> Result<ChargingOutcome> {
        let now = Utc::now();
        let mut order = self.load(order_id).await?;

        if order.pending_payment.is_some() {
            return Err(ChargingError::Conflict(format!(
                "order {} has a payment awaiting approval",
                order_id
            )));
        }
        match (kind, order.state) {
            (ChargeKind::Initial, OrderState::Pending) => {}
            (ChargeKind::Initial, state) => {
                return Err(ChargingError::Conflict(format!(
                    "order {} cannot be charged in state {:?}",
                    order_id, state
                )));
            }
            (_, OrderState::Completed) => {}
            (_, state) => {
                return Err(ChargingError::Validation(format!(
                    "order {} is not active (state {:?})",
                    order_id, state
                )));
            }
        }
        if let Some(unknown) = item_ids.iter().find(|id| order.contract(id).is_none()) {
            return Err(ChargingError::NotFound(format!("item {} in order {}", unknown, order_id)));
        }

        let lines = self.backend.rate(&order, kind, item_ids, usages, now).await?;
        if let Some(stray) = lines
            .iter()
            .find(|l| order.contract(&l.item_id).is_none() || !selected(item_ids, &l.item_id))
        {
            return Err(ChargingError::Upstream(format!(
                "{} pricing rated item {} which is not charged in order {}",
                self.backend.backend_id(),
                stray.item_id,
                order_id
            )));
        }
        if lines.is_empty() && kind != ChargeKind::Initial {
            return Err(ChargingError::Validation(format!(
                "nothing to charge for {} of order {}",
                kind.as_str(),
                order_id
            )));
        }

        let Some(total) = total(&lines)? else {
            self.record_charges(&mut order, kind, &lines, None, now).await?;
            info!(order_id = %order_id, "Free charge recorded");
            return Ok(ChargingOutcome::Completed { order });
        };

        let request = PaymentRequest {
            order_id: order.id.clone(),
            amount: total,
            description: format!("{} charge for order {}", kind.as_str(), order.id),
            return_url: format!("{}/checkout?action=accept&orderId={}", self.site_url, order.id),
            cancel_url: format!("{}/checkout?action=cancel&orderId={}", self.site_url, order.id),
        };
        let redirection = self.gateway.start_redirection_payment(&request).await?;

        order.pending_payment = Some(PendingPayment {
            reference: redirection.reference.clone(),
            kind,
            lines,
            created_at: now,
        });
        if kind == ChargeKind::Initial {
            order.state = OrderState::InProgress;
        }
        order.updated_at = now;
        self.orders.save(&order).await?;

        info!(
            order_id = %order_id,
            reference = %redirection.reference,
            amount = %request.amount,
            "Payment awaiting customer approval"
        );
        Ok(ChargingOutcome::Redirect {
            url: redirection.url,
            reference: redirection.reference,
        })
    }

    /// Capture an approved payment and record what it paid for
    #[instrument(skip(self, payer_id))]
    pub async fn end_charging(&self, order_id: &str, reference: &str, payer_id: Option<&str>) -> Result<Order> {
        self.locked(order_id, self.end_locked(order_id, reference, payer_id))
            .await
    }

    async fn end_locked(&self, order_id: &str, reference: &str, payer_id: Option<&str>) -> Result<Order> {
        let mut order = self.load(order_id).await?;
        let pending = order
            .pending_payment
            .clone()
            .ok_or_else(|| ChargingError::Validation(format!("order {} has no pending payment", order_id)))?;
        if pending.reference != reference {
            return Err(ChargingError::Validation(format!(
                "payment {} does not belong to order {}",
                reference, order_id
            )));
        }

        let receipt = self.gateway.end_payment(reference, payer_id).await?;

        let now = Utc::now();
        let before = order.clone();
        if let Err(e) = self
            .record_charges(&mut order, pending.kind, &pending.lines, Some(reference), now)
            .await
        {
            error!(order_id = %order_id, reference = %reference, error = %e, "Recording failed after capture, refunding");
            if let Err(refund_err) = self.gateway.refund(reference).await {
                error!(reference = %reference, error = %refund_err, "Refund failed");
            }
            let mut order = before;
            if let Err(save_err) = self.drop_payment(&mut order, pending.kind).await {
                error!(order_id = %order_id, error = %save_err, "Could not release refunded payment");
            }
            return Err(e);
        }

        info!(
            order_id = %order_id,
            reference = %receipt.reference,
            payer_id = receipt.payer_id.as_deref().unwrap_or("-"),
            "Payment captured"
        );
        Ok(order)
    }

    /// Abandon a pending payment
    #[instrument(skip(self))]
    pub async fn cancel_charging(&self, order_id: &str) -> Result<Order> {
        self.locked(order_id, self.cancel_locked(order_id)).await
    }

    async fn cancel_locked(&self, order_id: &str) -> Result<Order> {
        let mut order = self.load(order_id).await?;
        let pending = order
            .pending_payment
            .clone()
            .ok_or_else(|| ChargingError::Validation(format!("order {} has no pending payment", order_id)))?;

        self.drop_payment(&mut order, pending.kind).await?;

        info!(order_id = %order_id, reference = %pending.reference, "Payment cancelled");
        Ok(order)
    }

    /// Forget the pending payment; an unpaid initial charge fails the order
    async fn drop_payment(&self, order: &mut Order, kind: ChargeKind) -> Result<()> {
        order.pending_payment = None;
        if kind == ChargeKind::Initial {
            order.state = OrderState::Failed;
            for contract in &order.contracts {
                if let Err(e) = self.ordering.set_item_state(&order.id, &contract.item_id, "failed").await {
                    warn!(order_id = %order.id, item_id = %contract.item_id, error = %e, "Could not mark item failed");
                }
            }
        }
        order.updated_at = Utc::now();
        self.orders.save(order).await
    }

    /// Mark an order failed outside the charging flow
    pub async fn fail_order(&self, order_id: &str) -> Result<()> {
        self.locked(order_id, async {
            let mut order = self.load(order_id).await?;
            order.state = OrderState::Failed;
            order.pending_payment = None;
            order.updated_at = Utc::now();
            self.orders.save(&order).await
        })
        .await
    }

    /// Append charges, move the renovation dates, bill and activate.
    ///
    /// Bills created before a failure are voided; the caller still holds the
    /// order as it was before this call.
    async fn record_charges(
        &self,
        order: &mut Order,
        kind: ChargeKind,
        lines: &[ChargeLine],
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut billed = Vec::new();
        let result = self
            .apply_charges(order, kind, lines, reference, now, &mut billed)
            .await;
        if result.is_err() && !billed.is_empty() {
            self.billing.void(&billed).await;
        }
        result
    }

    async fn apply_charges(
        &self,
        order: &mut Order,
        kind: ChargeKind,
        lines: &[ChargeLine],
        reference: Option<&str>,
        now: DateTime<Utc>,
        billed: &mut Vec<String>,
    ) -> Result<()> {
        for idx in 0..order.contracts.len() {
            let item_id = order.contracts[idx].item_id.clone();
            let contract_lines: Vec<ChargeLine> =
                lines.iter().filter(|l| l.item_id == item_id).cloned().collect();
            if contract_lines.is_empty() && kind != ChargeKind::Initial {
                continue;
            }

            apply_charge(&mut order.contracts[idx], kind, &contract_lines, reference, now);

            let amount: Decimal = contract_lines.iter().map(|l| l.tax_included).sum();
            if amount > Decimal::ZERO {
                let bill = self
                    .billing
                    .bill(order, &order.contracts[idx], &contract_lines, reference.is_some())
                    .await?;
                billed.push(bill.id.clone());
                order.contracts[idx].register_bill(&bill);
            }
        }

        if kind == ChargeKind::Initial {
            for contract in &order.contracts {
                self.inventory.activate_product(&contract.product_id).await?;
                self.ordering.set_item_state(&order.id, &contract.item_id, "completed").await?;
            }
            order.state = OrderState::Completed;
        }
        order.pending_payment = None;
        order.updated_at = now;
        self.orders.save(order).await
    }
}

/// Amount to collect; `None` when the lines are free
fn total(lines: &[ChargeLine]) -> Result<Option<Money>> {
    let Some(first) = lines.first() else {
        return Ok(None);
    };
    if let Some(other) = lines.iter().find(|l| l.currency != first.currency) {
        return Err(ChargingError::Validation(format!(
            "cannot charge {} and {} in the same payment",
            first.currency, other.currency
        )));
    }

    let amount: Decimal = lines.iter().map(|l| l.tax_included).sum();
    if amount.is_zero() {
        return Ok(None);
    }
    Ok(Some(Money::new(amount, first.currency.clone())))
}

fn apply_charge(
    contract: &mut Contract,
    kind: ChargeKind,
    lines: &[ChargeLine],
    reference: Option<&str>,
    now: DateTime<Utc>,
) {
    if let Some(first) = lines.first() {
        let coverage = lines
            .iter()
            .filter_map(|l| l.coverage)
            .reduce(Coverage::union);
        contract.charges.push(Charge {
            date: now,
            concept: kind,
            amount: lines.iter().map(|l| l.tax_included).sum(),
            duty_free: lines.iter().map(|l| l.duty_free).sum(),
            currency: first.currency.clone(),
            coverage,
            reference: reference.map(str::to_string),
            bill_id: None,
        });
    }

    let Some(period) = contract.period else {
        return;
    };
    match kind {
        ChargeKind::Initial => {
            contract.last_charge = Some(now);
            contract.next_charge = Some(period.advance(now, 1));
        }
        ChargeKind::Renovation => {
            let periods = lines.iter().map(|l| l.periods).max().unwrap_or(1).max(1);
            let last = period.advance(contract.last_charge.unwrap_or(now), periods);
            contract.last_charge = Some(last);
            contract.next_charge = Some(period.advance(last, 1));
        }
        ChargeKind::Usage => {}
    }
}
