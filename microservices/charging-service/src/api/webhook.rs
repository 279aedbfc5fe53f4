//! Customer-bill notifications from the billing API

use axum::http::HeaderMap;
use charging_core::{ChargingError, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check `X-Hub-Signature-256: sha256=<hex>` against the raw body
pub fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ChargingError::Unauthorized("missing webhook signature".into()))?;

    let signature = header
        .strip_prefix("sha256=")
        .and_then(|hex_sig| hex::decode(hex_sig.trim()).ok())
        .ok_or_else(|| ChargingError::Unauthorized("malformed webhook signature".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ChargingError::Config("invalid webhook secret".into()))?;
    mac.update(body);
    mac.verify_slice(&signature).map_err(|_| {
        warn!("Webhook signature mismatch");
        ChargingError::Unauthorized("webhook signature mismatch".into())
    })
}

/// Header value for a body signed with `secret`
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ChargingError::Config("invalid webhook secret".into()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    customer_bill: BillRef,
}

/// Accepted notification shapes: a TMF event envelope, a bare
/// `{"customerBill": {...}}` payload, or the bill itself
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Notification {
    Envelope { event: EventPayload },
    Payload(EventPayload),
    Bill(BillRef),
}

/// Bill id carried by a notification body
pub fn bill_id(body: &[u8]) -> Result<String> {
    let notification: Notification = serde_json::from_slice(body)
        .map_err(|e| ChargingError::Validation(format!("unrecognised customer bill notification: {}", e)))?;

    let id = match notification {
        Notification::Envelope { event } => event.customer_bill.id,
        Notification::Payload(payload) => payload.customer_bill.id,
        Notification::Bill(bill) => bill.id,
    };
    if id.trim().is_empty() {
        return Err(ChargingError::Validation("customer bill id is empty".into()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"id":"cb-1"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sign("s3cret", body).unwrap()).unwrap());

        assert!(verify_signature("s3cret", &headers, body).is_ok());
        assert!(matches!(
            verify_signature("other", &headers, body),
            Err(ChargingError::Unauthorized(_))
        ));
        assert!(verify_signature("s3cret", &headers, b"tampered").is_err());
    }

    #[test]
    fn test_missing_or_malformed_signature() {
        let mut headers = HeaderMap::new();
        assert!(verify_signature("s", &headers, b"{}").is_err());

        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("md5=abc"));
        assert!(verify_signature("s", &headers, b"{}").is_err());
    }

    #[test]
    fn test_bill_id_shapes() {
        let envelope = br#"{"eventType":"CustomerBillCreateEvent","event":{"customerBill":{"id":"cb-1"}}}"#;
        assert_eq!(bill_id(envelope).unwrap(), "cb-1");
        assert_eq!(bill_id(br#"{"customerBill":{"id":"cb-2"}}"#).unwrap(), "cb-2");
        assert_eq!(bill_id(br#"{"id":"cb-3","state":"new"}"#).unwrap(), "cb-3");
        assert!(bill_id(br#"{"id":" "}"#).is_err());
        assert!(bill_id(b"not json").is_err());
    }
}
