pub mod reconcile;
pub mod stripe;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::{Insertable, Queryable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::shared::errors::ServiceError;
use crate::shared::schema::{activation_codes, orders};
use crate::shared::state::AppState;

use self::reconcile::{CheckoutPoll, CheckoutStarted};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = orders)]
pub struct Order {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub email: String,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
    pub status: String,
    pub amount_cents: Option<i64>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = activation_codes)]
pub struct ActivationCode {
    pub id: Uuid,
    pub order_id: Uuid,
    pub code: String,
    pub email: Option<String>,
    pub used: bool,
    pub used_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ActivationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

#[derive(Debug, Deserialize)]
pub struct StartCheckoutRequest {
    pub email: String,
}

pub async fn start_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<StartCheckoutRequest>,
) -> Result<Json<CheckoutStarted>, (StatusCode, String)> {
    let started = reconcile::start_checkout(&state, user.0, req.email).await?;
    Ok(Json(started))
}

/// Payment provider webhook endpoint. The provider retries deliveries,
/// so a duplicate event must come back 200, not an error.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "missing stripe-signature header".to_string(),
        ))?;

    let event = state
        .stripe
        .verify_webhook_signature(&body, signature)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    reconcile::reconcile_webhook_event(&mut conn, &state, &event)?;

    Ok(Json(serde_json::json!({ "received": true })))
}

pub async fn poll_checkout(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<Json<CheckoutPoll>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let poll = reconcile::poll_status(&mut conn, &session_id)?;
    Ok(Json(poll))
}

pub fn configure_billing_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/billing/checkout", post(start_checkout))
        .route("/api/billing/checkout/:session_id", get(poll_checkout))
        .route("/api/billing/webhook", post(stripe_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_order_status_round_trip() {
        for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Failed] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("refunded"), None);
    }

    fn code_expiring_at(expires_at: Option<DateTime<Utc>>) -> ActivationCode {
        ActivationCode {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            code: "x".repeat(32),
            email: None,
            used: false,
            used_by: None,
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_code_expiry() {
        let now = Utc::now();
        assert!(code_expiring_at(Some(now - Duration::hours(1))).is_expired(now));
        assert!(!code_expiring_at(Some(now + Duration::hours(1))).is_expired(now));
        assert!(!code_expiring_at(None).is_expired(now));
    }
}
