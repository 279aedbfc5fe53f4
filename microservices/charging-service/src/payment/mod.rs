//! Payment gateways (redirection flow)
//!
//! The customer is sent to the gateway's approval page and comes back to the
//! marketplace, which then captures the payment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use charging_core::{ChargingError, Money};
use serde::{Deserialize, Serialize};

mod paypal;

pub use paypal::PaypalGateway;

/// Payment to be approved by the customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: String,
    pub amount: Money,
    pub description: String,
    pub return_url: String,
    pub cancel_url: String,
}

/// Where to send the customer, and the gateway's handle on the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirection {
    pub reference: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub reference: String,
    pub payer_id: Option<String>,
    pub amount: Option<Money>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Payment rejected: {0}")]
    Rejected(String),
    #[error("No payment gateway configured")]
    NotConfigured,
}

impl From<GatewayError> for ChargingError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(msg) => ChargingError::Upstream(format!("payment gateway: {}", msg)),
            GatewayError::Api(msg) => ChargingError::Upstream(format!("payment gateway: {}", msg)),
            GatewayError::Rejected(msg) => ChargingError::Payment(msg),
            GatewayError::NotConfigured => ChargingError::Payment("no payment gateway configured".into()),
        }
    }
}

/// Payment gateway trait
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn gateway_id(&self) -> &'static str;
    async fn start_redirection_payment(&self, request: &PaymentRequest) -> Result<Redirection, GatewayError>;
    async fn end_payment(&self, reference: &str, payer_id: Option<&str>) -> Result<PaymentReceipt, GatewayError>;
    async fn refund(&self, reference: &str) -> Result<String, GatewayError>;
}

/// Gateway used when no payment provider is configured; only free orders go through
pub struct FreeGateway;

#[async_trait]
impl PaymentGateway for FreeGateway {
    fn gateway_id(&self) -> &'static str {
        "none"
    }

    async fn start_redirection_payment(&self, _request: &PaymentRequest) -> Result<Redirection, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn end_payment(&self, _reference: &str, _payer_id: Option<&str>) -> Result<PaymentReceipt, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn refund(&self, _reference: &str) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
