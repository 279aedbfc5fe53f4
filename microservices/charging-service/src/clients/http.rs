//! HTTP implementation of the marketplace API clients

use async_trait::async_trait;
use charging_core::{ChargingError, Result};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{BillingAccount, BillingApi, CatalogApi, InventoryApi, OrderingApi, PartyApi};
use crate::billing::{AppliedRate, BillState, CustomerBill};
use crate::config::ApiEndpoints;
use crate::pricing::{ProductOffering, ProductOfferingPrice};

/// One client for all sibling APIs, sharing a connection pool
#[derive(Clone)]
pub struct HttpClients {
    client: Client,
    endpoints: ApiEndpoints,
}

fn transport_error(err: reqwest::Error) -> ChargingError {
    if err.is_timeout() {
        ChargingError::Timeout(err.to_string())
    } else {
        ChargingError::Network(err.to_string())
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl HttpClients {
    pub fn new(endpoints: ApiEndpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChargingError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, endpoints })
    }

    fn request(&self, method: Method, base: &str, path: &str) -> RequestBuilder {
        let url = join(base, path);
        debug!(method = %method, url = %url, "Calling upstream API");
        self.client.request(method, url)
    }

    /// Send and decode a JSON body; `None` on 404
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChargingError::Upstream(format!("{}: {}", status, body)));
        }

        let value = response
            .json()
            .await
            .map_err(|e| ChargingError::Upstream(format!("invalid response body: {}", e)))?;
        Ok(Some(value))
    }

    /// Send and discard the body
    async fn send(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChargingError::Upstream(format!("{}: {}", status, body)))
    }

    async fn get<T: DeserializeOwned>(&self, base: &str, path: &str, what: &str) -> Result<T> {
        self.fetch(self.request(Method::GET, base, path))
            .await?
            .ok_or_else(|| ChargingError::NotFound(what.to_string()))
    }
}

#[async_trait]
impl CatalogApi for HttpClients {
    async fn get_offering(&self, id: &str) -> Result<ProductOffering> {
        self.get(
            &self.endpoints.catalog,
            &format!("productOffering/{}", id),
            &format!("product offering {}", id),
        )
        .await
    }

    async fn get_price(&self, id: &str) -> Result<ProductOfferingPrice> {
        self.get(
            &self.endpoints.catalog,
            &format!("productOfferingPrice/{}", id),
            &format!("product offering price {}", id),
        )
        .await
    }
}

#[async_trait]
impl PartyApi for HttpClients {
    async fn get_billing_account(&self, id: &str) -> Result<BillingAccount> {
        self.get(
            &self.endpoints.party,
            &format!("billingAccount/{}", id),
            &format!("billing account {}", id),
        )
        .await
    }
}

#[async_trait]
impl InventoryApi for HttpClients {
    async fn activate_product(&self, product_id: &str) -> Result<()> {
        let request = self
            .request(Method::PATCH, &self.endpoints.inventory, &format!("product/{}", product_id))
            .json(&json!({ "status": "active" }));
        self.send(request).await
    }
}

#[async_trait]
impl OrderingApi for HttpClients {
    async fn set_item_state(&self, order_id: &str, item_id: &str, state: &str) -> Result<()> {
        let request = self
            .request(Method::PATCH, &self.endpoints.ordering, &format!("productOrder/{}", order_id))
            .json(&json!({ "productOrderItem": [{ "id": item_id, "state": state }] }));
        self.send(request).await
    }
}

#[async_trait]
impl BillingApi for HttpClients {
    async fn create_applied_rate(&self, rate: &AppliedRate) -> Result<AppliedRate> {
        let request = self
            .request(Method::POST, &self.endpoints.billing, "appliedCustomerBillingRate")
            .json(rate);
        self.fetch(request)
            .await?
            .ok_or_else(|| ChargingError::Upstream("billing API rejected the applied rate".into()))
    }

    async fn update_applied_rate(&self, rate: &AppliedRate) -> Result<()> {
        let request = self
            .request(
                Method::PATCH,
                &self.endpoints.billing,
                &format!("appliedCustomerBillingRate/{}", rate.id),
            )
            .json(&json!({ "isBilled": rate.is_billed, "billId": rate.bill_id }));
        self.send(request).await
    }

    async fn create_customer_bill(&self, bill: &CustomerBill) -> Result<CustomerBill> {
        let request = self
            .request(Method::POST, &self.endpoints.billing, "customerBill")
            .json(bill);
        self.fetch(request)
            .await?
            .ok_or_else(|| ChargingError::Upstream("billing API rejected the customer bill".into()))
    }

    async fn set_bill_state(&self, id: &str, state: BillState) -> Result<()> {
        let request = self
            .request(Method::PATCH, &self.endpoints.billing, &format!("customerBill/{}", id))
            .json(&json!({ "state": state }));
        self.send(request).await
    }

    async fn get_customer_bill(&self, id: &str) -> Result<Option<CustomerBill>> {
        self.fetch(self.request(Method::GET, &self.endpoints.billing, &format!("customerBill/{}", id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_normalises_slashes() {
        assert_eq!(join("http://catalog/api/", "/productOffering/1"), "http://catalog/api/productOffering/1");
        assert_eq!(join("http://catalog/api", "productOffering/1"), "http://catalog/api/productOffering/1");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_network_error() {
        let endpoints = ApiEndpoints {
            catalog: "http://127.0.0.1:9".into(),
            ordering: "http://127.0.0.1:9".into(),
            inventory: "http://127.0.0.1:9".into(),
            billing: "http://127.0.0.1:9".into(),
            party: "http://127.0.0.1:9".into(),
            billing_engine: None,
        };
        let clients = HttpClients::new(endpoints, Duration::from_secs(2)).unwrap();
        let err = clients.get_offering("po-1").await.unwrap_err();
        assert!(matches!(err, ChargingError::Network(_) | ChargingError::Timeout(_)));
    }
}
