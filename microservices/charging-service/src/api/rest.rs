//! Charging REST API

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use charging_core::{ChargingError, DependencyStatus, ReadinessStatus};
use charging_store::StorePool;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::webhook;
use crate::charging::{ChargingOutcome, Engine};
use crate::orders::{OrderRequest, OrderService};
use crate::pricing::{PriceEngine, PriceRequest, PriceResponse, UsageRecord};
use crate::queue::{CbWorkersService, QueueStore};
use crate::types::{ChargeKind, Order};

const BASE: &str = "/charging/api/orderManagement";

#[derive(Clone)]
pub struct AppState {
    pub prices: Arc<PriceEngine>,
    pub orders: Arc<OrderService>,
    pub engine: Arc<Engine>,
    pub queue: Arc<dyn QueueStore>,
    pub webhook_secret: Option<Arc<str>>,
    pub store_backend: &'static str,
    pub workers: Arc<CbWorkersService>,
    pub pool: Option<StorePool>,
}

impl AppState {
    /// Worker pool state plus database health when running on Postgres
    pub async fn readiness(&self) -> ReadinessStatus {
        let mut dependencies = vec![DependencyStatus {
            name: "cb-workers".to_string(),
            available: self.workers.is_running(),
            latency_ms: None,
        }];

        if let Some(pool) = &self.pool {
            let started = std::time::Instant::now();
            let available = pool.is_healthy().await;
            dependencies.push(DependencyStatus {
                name: "postgres".to_string(),
                available,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            });
        }

        ReadinessStatus {
            ready: dependencies.iter().all(|d| d.available),
            dependencies,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Pricing
        .route(&format!("{BASE}/orders/preview"), post(preview))
        // Charging
        .route(&format!("{BASE}/orders"), post(create_order))
        .route(&format!("{BASE}/orders/accept"), post(accept_payment))
        .route(&format!("{BASE}/orders/cancel"), post(cancel_payment))
        .route(&format!("{BASE}/orders/{{id}}"), get(get_order))
        .route(&format!("{BASE}/orders/{{id}}/renew"), post(renew))
        .route(&format!("{BASE}/orders/{{id}}/usage"), post(charge_usage))
        // Notifications
        .route(&format!("{BASE}/notify/customerBill"), post(notify_customer_bill))
        .with_state(state)
}

/// Error body: stable code plus message; internal details stay in the logs
pub struct ApiError(ChargingError);

impl From<ChargingError> for ApiError {
    fn from(err: ChargingError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status.is_server_error() && !matches!(self.0, ChargingError::Upstream(_)) {
            error!(error = ?self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(json!({
            "error": self.0.error_code(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> Response {
    let readiness = state.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(json!({
        "status": if readiness.ready { "ready" } else { "not ready" },
        "store": state.store_backend,
        "pricing": state.engine.backend_id(),
        "gateway": state.engine.gateway_id(),
        "dependencies": readiness.dependencies,
    }));
    (status, body).into_response()
}

async fn preview(
    State(state): State<AppState>,
    Json(req): Json<PriceRequest>,
) -> ApiResult<Json<PriceResponse>> {
    Ok(Json(state.prices.calculate_prices(&req).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RedirectResponse {
    redirect_url: String,
    reference: String,
}

/// `completed` answers with the order, a redirection with the payment URL
fn outcome_response(outcome: ChargingOutcome, completed: StatusCode) -> Response {
    match outcome {
        ChargingOutcome::Completed { order } => (completed, Json(order)).into_response(),
        ChargingOutcome::Redirect { url, reference } => (
            StatusCode::OK,
            Json(RedirectResponse {
                redirect_url: url,
                reference,
            }),
        )
            .into_response(),
    }
}

async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<OrderRequest>,
) -> ApiResult<Response> {
    let outcome = state.orders.create(req).await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Order>> {
    Ok(Json(state.orders.get(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptRequest {
    order_id: String,
    reference: String,
    #[serde(default)]
    payer_id: Option<String>,
}

async fn accept_payment(
    State(state): State<AppState>,
    Json(req): Json<AcceptRequest>,
) -> ApiResult<Json<Order>> {
    let order = state
        .engine
        .end_charging(&req.order_id, &req.reference, req.payer_id.as_deref())
        .await?;
    Ok(Json(order))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    order_id: String,
}

async fn cancel_payment(
    State(state): State<AppState>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.engine.cancel_charging(&req.order_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewRequest {
    #[serde(default)]
    items: Vec<String>,
}

async fn renew(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenewRequest>,
) -> ApiResult<Response> {
    let outcome = state
        .engine
        .resolve_charging(&id, ChargeKind::Renovation, &req.items, &[])
        .await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageRequest {
    #[serde(default)]
    items: Vec<String>,
    usages: Vec<UsageRecord>,
}

async fn charge_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UsageRequest>,
) -> ApiResult<Response> {
    if req.usages.is_empty() {
        return Err(ChargingError::Validation("no usage reported".into()).into());
    }
    let outcome = state
        .engine
        .resolve_charging(&id, ChargeKind::Usage, &req.items, &req.usages)
        .await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

async fn notify_customer_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if let Some(secret) = &state.webhook_secret {
        webhook::verify_signature(secret, &headers, &body)?;
    }
    let bill_id = webhook::bill_id(&body)?;
    let entry = state.queue.push(&bill_id).await?;

    info!(bill_id = %bill_id, entry_id = %entry.id, "Customer bill queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": entry.id, "billId": bill_id }))))
}
