//! PayPal checkout gateway

use async_trait::async_trait;
use chrono::Utc;
use charging_core::{round_money, Money};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{GatewayError, PaymentGateway, PaymentReceipt, PaymentRequest, Redirection};

pub struct PaypalGateway {
    base_url: String,
    client_id: String,
    client_secret: String,
    http_client: reqwest::Client,
}

impl PaypalGateway {
    pub fn new(base_url: &str, client_id: String, client_secret: String, timeout: Duration) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            http_client,
        })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let response = self
            .http_client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let result = json_body(response).await?;
        result["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Api("token response without access_token".into()))
    }
}

/// Read a JSON body, turning non-2xx answers into API errors
async fn json_body(response: reqwest::Response) -> Result<serde_json::Value, GatewayError> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| GatewayError::Api(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let message = body["message"]
        .as_str()
        .or_else(|| body["error_description"].as_str())
        .unwrap_or("Unknown error");
    if status.as_u16() == 422 {
        Err(GatewayError::Rejected(message.to_string()))
    } else {
        Err(GatewayError::Api(format!("{}: {}", status, message)))
    }
}

/// Link with the given relation from a HATEOAS `links` array
fn link(body: &serde_json::Value, rels: &[&str]) -> Option<String> {
    body["links"].as_array()?.iter().find_map(|l| {
        let rel = l["rel"].as_str()?;
        rels.contains(&rel).then(|| l["href"].as_str().map(str::to_string)).flatten()
    })
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn gateway_id(&self) -> &'static str {
        "paypal"
    }

    async fn start_redirection_payment(&self, request: &PaymentRequest) -> Result<Redirection, GatewayError> {
        let token = self.access_token().await?;

        let payload = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_id,
                "description": request.description,
                "amount": {
                    "currency_code": request.amount.unit,
                    "value": round_money(request.amount.value).to_string()
                }
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW"
            }
        });

        let response = self
            .http_client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let result = json_body(response).await?;
        let reference = result["id"]
            .as_str()
            .ok_or_else(|| GatewayError::Api("checkout order without id".into()))?
            .to_string();
        let url = link(&result, &["approve", "payer-action"])
            .ok_or_else(|| GatewayError::Api("checkout order without approval link".into()))?;

        info!(order_id = %request.order_id, reference = %reference, "PayPal checkout created");
        Ok(Redirection { reference, url })
    }

    async fn end_payment(&self, reference: &str, payer_id: Option<&str>) -> Result<PaymentReceipt, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .http_client
            .post(format!("{}/v2/checkout/orders/{}/capture", self.base_url, reference))
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let result = json_body(response).await?;
        let status = result["status"].as_str().unwrap_or("UNKNOWN");
        if status != "COMPLETED" {
            return Err(GatewayError::Rejected(format!("capture finished with status {}", status)));
        }

        let captured_payer = result["payer"]["payer_id"].as_str();
        if let (Some(expected), Some(actual)) = (payer_id, captured_payer) {
            if expected != actual {
                return Err(GatewayError::Rejected("payer does not match the approved payment".into()));
            }
        }

        let capture = &result["purchase_units"][0]["payments"]["captures"][0];
        let amount = match (capture["amount"]["value"].as_str(), capture["amount"]["currency_code"].as_str()) {
            (Some(value), Some(currency)) => Decimal::from_str(value).ok().map(|v| Money::new(v, currency)),
            _ => None,
        };

        debug!(reference = %reference, "PayPal payment captured");
        Ok(PaymentReceipt {
            reference: reference.to_string(),
            payer_id: captured_payer.or(payer_id).map(str::to_string),
            amount,
            captured_at: Utc::now(),
        })
    }

    async fn refund(&self, reference: &str) -> Result<String, GatewayError> {
        let token = self.access_token().await?;

        let order = self
            .http_client
            .get(format!("{}/v2/checkout/orders/{}", self.base_url, reference))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let order = json_body(order).await?;
        let capture_id = order["purchase_units"][0]["payments"]["captures"][0]["id"]
            .as_str()
            .ok_or_else(|| GatewayError::Api(format!("payment {} has no capture to refund", reference)))?;

        let response = self
            .http_client
            .post(format!("{}/v2/payments/captures/{}/refund", self.base_url, capture_id))
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let result = json_body(response).await?;
        Ok(result["id"].as_str().unwrap_or_default().to_string())
    }
}
