use chrono::{Duration, Utc};
use diesel::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::auth;
use crate::notify::{self, NotificationKind};
use crate::shared::errors::ServiceError;
use crate::shared::schema::{activation_codes, orders};
use crate::shared::state::AppState;
use crate::shared::utils::{advisory_xact_lock, locked_transaction};

use super::stripe::{
    CreateCheckoutSessionParams, StripeCheckoutSession, StripeWebhookEvent, WebhookEventType,
};
use super::{ActivationCode, Order, OrderStatus};

#[derive(Debug, Serialize)]
pub struct CheckoutStarted {
    pub order_id: Uuid,
    pub session_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied { order_id: Uuid, code_minted: bool },
    Ignored,
}

#[derive(Debug, Serialize)]
pub struct CheckoutPoll {
    pub status: &'static str,
    pub activation_code: Option<String>,
}

/// One-time secret; 32 alphanumeric characters.
pub fn generate_activation_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Starts a checkout for a not-yet-provisioned identity.
///
/// A provider failure leaves an auditable `failed` order behind rather
/// than deleting the row or keeping it `pending` forever.
pub async fn start_checkout(
    state: &AppState,
    user_id: Uuid,
    email: String,
) -> Result<CheckoutStarted, ServiceError> {
    if email.trim().is_empty() {
        return Err(ServiceError::Validation("email must not be empty".into()));
    }

    let mut conn = state.conn.get()?;
    if auth::identity_company(&mut conn, user_id)?.is_some() {
        return Err(ServiceError::Conflict(
            "this account is already attached to a company".into(),
        ));
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        company_id: None,
        email: email.clone(),
        stripe_session_id: None,
        stripe_payment_intent: None,
        status: OrderStatus::Pending.as_str().to_string(),
        amount_cents: Some(state.config.stripe.license_price_cents),
        currency: state.config.stripe.currency.clone(),
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(orders::table)
        .values(&order)
        .execute(&mut conn)?;

    let params = CreateCheckoutSessionParams {
        customer_email: email,
        product_name: "Field service license".to_string(),
        amount_cents: state.config.stripe.license_price_cents,
        currency: state.config.stripe.currency.clone(),
        order_id: order.id,
        success_url: state.config.stripe.success_url.clone(),
        cancel_url: state.config.stripe.cancel_url.clone(),
    };

    match state.stripe.create_checkout_session(params).await {
        Ok(session) => {
            diesel::update(orders::table.find(order.id))
                .set((
                    orders::stripe_session_id.eq(Some(session.id.clone())),
                    orders::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            Ok(CheckoutStarted {
                order_id: order.id,
                session_id: session.id,
                checkout_url: session.url,
            })
        }
        Err(e) => {
            log::error!("checkout session creation failed for order {}: {e}", order.id);
            diesel::update(orders::table.find(order.id))
                .set((
                    orders::status.eq(OrderStatus::Failed.as_str()),
                    orders::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            Err(ServiceError::External(e.to_string()))
        }
    }
}

/// Applies a verified webhook event. Safe to call any number of times
/// for the same event; duplicates settle into the same end state.
pub fn reconcile_webhook_event(
    conn: &mut PgConnection,
    state: &AppState,
    event: &StripeWebhookEvent,
) -> Result<ReconcileOutcome, ServiceError> {
    match state
        .stripe
        .parse_webhook_event(event)
        .map_err(|e| ServiceError::External(e.to_string()))?
    {
        WebhookEventType::CheckoutCompleted(session) => apply_checkout_completed(
            conn,
            state.config.service.activation_code_lifetime_hours,
            &session,
        ),
        WebhookEventType::Unknown(kind) => {
            log::debug!("ignoring webhook event of type {kind}");
            Ok(ReconcileOutcome::Ignored)
        }
    }
}

/// Order id embedded in the session metadata at checkout creation, if
/// the session carries one.
fn embedded_order_id(session: &StripeCheckoutSession) -> Option<Uuid> {
    session
        .metadata
        .get("order_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn apply_checkout_completed(
    conn: &mut PgConnection,
    code_lifetime_hours: i64,
    session: &StripeCheckoutSession,
) -> Result<ReconcileOutcome, ServiceError> {
    locked_transaction(conn, |conn| {
        // Serializes duplicate deliveries of the same session, including
        // the defensive-insert path where no order row exists to lock.
        advisory_xact_lock(conn, &format!("order_session:{}", session.id))?;

        let mut order: Option<Order> = None;
        if let Some(order_id) = embedded_order_id(session) {
            order = orders::table
                .find(order_id)
                .for_update()
                .first(conn)
                .optional()?;
        }
        if order.is_none() {
            order = orders::table
                .filter(orders::stripe_session_id.eq(&session.id))
                .for_update()
                .first(conn)
                .optional()?;
        }

        let order = match order {
            Some(order) => order,
            None => {
                // The checkout row is gone or never existed here;
                // reconstruct it from the event so the payment is not lost.
                let now = Utc::now();
                let order = Order {
                    id: embedded_order_id(session).unwrap_or_else(Uuid::new_v4),
                    company_id: None,
                    email: session.customer_email.clone().unwrap_or_default(),
                    stripe_session_id: Some(session.id.clone()),
                    stripe_payment_intent: None,
                    status: OrderStatus::Pending.as_str().to_string(),
                    amount_cents: None,
                    currency: session.currency.clone().unwrap_or_default(),
                    created_at: now,
                    updated_at: now,
                };
                diesel::insert_into(orders::table)
                    .values(&order)
                    .execute(conn)?;
                order
            }
        };

        diesel::update(orders::table.find(order.id))
            .set((
                orders::status.eq(OrderStatus::Paid.as_str()),
                orders::stripe_session_id.eq(Some(session.id.clone())),
                orders::stripe_payment_intent
                    .eq(session.payment_intent.clone().or(order.stripe_payment_intent.clone())),
                orders::amount_cents.eq(session.amount_total.or(order.amount_cents)),
                orders::currency
                    .eq(session.currency.clone().unwrap_or_else(|| order.currency.clone())),
                orders::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        let recipient = if order.email.is_empty() {
            session.customer_email.clone()
        } else {
            Some(order.email.clone())
        };

        let now = Utc::now();
        let code_row = ActivationCode {
            id: Uuid::new_v4(),
            order_id: order.id,
            code: generate_activation_code(),
            email: recipient.clone(),
            used: false,
            used_by: None,
            created_at: now,
            expires_at: Some(now + Duration::hours(code_lifetime_hours)),
        };

        // The unique order_id constraint makes this a create-if-absent;
        // a duplicate event can never mint a second code.
        let inserted = diesel::insert_into(activation_codes::table)
            .values(&code_row)
            .on_conflict(activation_codes::order_id)
            .do_nothing()
            .execute(conn)?;

        if inserted > 0 {
            notify::enqueue(
                conn,
                NotificationKind::ActivationCodeEmail,
                serde_json::json!({
                    "order_id": order.id,
                    "email": recipient,
                    "code": code_row.code,
                }),
            )?;
        }

        Ok(ReconcileOutcome::Applied {
            order_id: order.id,
            code_minted: inserted > 0,
        })
    })
}

/// Reports checkout progress without mutating anything; the webhook is
/// the sole writer on this path.
pub fn poll_status(
    conn: &mut PgConnection,
    session_id: &str,
) -> Result<CheckoutPoll, ServiceError> {
    let order: Order = orders::table
        .filter(orders::stripe_session_id.eq(session_id))
        .first(conn)?;

    let status = OrderStatus::parse(&order.status).ok_or_else(|| {
        ServiceError::Validation(format!("stored order status '{}' is not valid", order.status))
    })?;

    let code: Option<String> = match status {
        OrderStatus::Paid => activation_codes::table
            .filter(activation_codes::order_id.eq(order.id))
            .select(activation_codes::code)
            .first(conn)
            .optional()?,
        _ => None,
    };

    let (status, activation_code) = derive_poll_status(status, code);
    Ok(CheckoutPoll {
        status,
        activation_code,
    })
}

/// `processing` means the order is paid but the code has not
/// materialized yet; the poll never races ahead of the webhook.
fn derive_poll_status(
    status: OrderStatus,
    code: Option<String>,
) -> (&'static str, Option<String>) {
    match (status, code) {
        (OrderStatus::Pending, _) => ("pending", None),
        (OrderStatus::Failed, _) => ("failed", None),
        (OrderStatus::Paid, Some(code)) => ("ready", Some(code)),
        (OrderStatus::Paid, None) => ("processing", None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_activation_code_shape() {
        let code = generate_activation_code();
        assert_eq!(code.len(), 32);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_activation_codes_are_unique() {
        assert_ne!(generate_activation_code(), generate_activation_code());
    }

    fn session_with_metadata(metadata: HashMap<String, String>) -> StripeCheckoutSession {
        StripeCheckoutSession {
            id: "cs_test_1".into(),
            url: None,
            payment_intent: None,
            customer_email: None,
            amount_total: None,
            currency: None,
            payment_status: None,
            metadata,
        }
    }

    #[test]
    fn test_embedded_order_id_parses_metadata() {
        let order_id = Uuid::new_v4();
        let mut metadata = HashMap::new();
        metadata.insert("order_id".to_string(), order_id.to_string());
        assert_eq!(
            embedded_order_id(&session_with_metadata(metadata)),
            Some(order_id)
        );
    }

    #[test]
    fn test_embedded_order_id_ignores_garbage() {
        let mut metadata = HashMap::new();
        metadata.insert("order_id".to_string(), "not-a-uuid".to_string());
        assert_eq!(embedded_order_id(&session_with_metadata(metadata)), None);
        assert_eq!(
            embedded_order_id(&session_with_metadata(HashMap::new())),
            None
        );
    }

    #[test]
    fn test_poll_status_derivation() {
        assert_eq!(
            derive_poll_status(OrderStatus::Pending, None),
            ("pending", None)
        );
        assert_eq!(
            derive_poll_status(OrderStatus::Failed, None),
            ("failed", None)
        );
        assert_eq!(
            derive_poll_status(OrderStatus::Paid, None),
            ("processing", None)
        );
        assert_eq!(
            derive_poll_status(OrderStatus::Paid, Some("abc".into())),
            ("ready", Some("abc".into()))
        );
    }
}
