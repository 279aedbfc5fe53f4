//! Rating delegated to an external billing engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use charging_core::{ChargingError, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{selected, PricingBackend};
use crate::pricing::UsageRecord;
use crate::types::{ChargeKind, ChargeLine, Contract, Order};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateRequest<'a> {
    order_id: &'a str,
    customer_id: &'a str,
    billing_account_id: Option<&'a str>,
    date: DateTime<Utc>,
    contracts: Vec<&'a Contract>,
    usages: &'a [UsageRecord],
}

pub struct RemoteEngine {
    client: Client,
    base_url: String,
}

impl RemoteEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChargingError::Config(format!("billing engine client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, kind: ChargeKind) -> String {
        format!("{}/charging/api/billing/{}", self.base_url, kind.as_str())
    }
}

#[async_trait]
impl PricingBackend for RemoteEngine {
    fn backend_id(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self, order, item_ids, usages), fields(order_id = %order.id, kind = kind.as_str()))]
    async fn rate(
        &self,
        order: &Order,
        kind: ChargeKind,
        item_ids: &[String],
        usages: &[UsageRecord],
        now: DateTime<Utc>,
    ) -> Result<Vec<ChargeLine>> {
        let request = RateRequest {
            order_id: &order.id,
            customer_id: &order.customer_id,
            billing_account_id: order.billing_account_id.as_deref(),
            date: now,
            contracts: order
                .contracts
                .iter()
                .filter(|c| selected(item_ids, &c.item_id))
                .collect(),
            usages,
        };

        let response = self
            .client
            .post(self.url(kind))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChargingError::Upstream(format!("billing engine: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChargingError::Upstream(format!("billing engine {}: {}", status, body)));
        }

        let lines: Vec<ChargeLine> = response
            .json()
            .await
            .map_err(|e| ChargingError::Upstream(format!("billing engine response: {}", e)))?;

        debug!(lines = lines.len(), "Billing engine rated order");
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_per_charge_kind() {
        let engine = RemoteEngine::new("http://engine:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            engine.url(ChargeKind::Renovation),
            "http://engine:8080/charging/api/billing/renovation"
        );
        assert_eq!(engine.backend_id(), "remote");
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_upstream_error() {
        let engine = RemoteEngine::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let order = crate::testing::sample_order("order-1");
        let err = engine
            .rate(&order, ChargeKind::Initial, &[], &[], Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
