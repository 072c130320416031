use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StripeClient {
    api_key: String,
    webhook_secret: Option<String>,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionParams {
    pub customer_email: String,
    pub product_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub order_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeWebhookData,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeWebhookData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum StripeError {
    ApiError(String),
    NetworkError(String),
    InvalidWebhook(String),
    ParseError(String),
    NotConfigured,
}

impl std::fmt::Display for StripeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiError(e) => write!(f, "Stripe API error: {e}"),
            Self::NetworkError(e) => write!(f, "Network error: {e}"),
            Self::InvalidWebhook(e) => write!(f, "Invalid webhook: {e}"),
            Self::ParseError(e) => write!(f, "Parse error: {e}"),
            Self::NotConfigured => write!(f, "Stripe is not configured"),
        }
    }
}

impl std::error::Error for StripeError {}

#[derive(Debug, Clone)]
pub enum WebhookEventType {
    CheckoutCompleted(StripeCheckoutSession),
    Unknown(String),
}

impl StripeClient {
    pub fn new(api_key: String, webhook_secret: Option<String>) -> Self {
        Self {
            api_key,
            webhook_secret,
            client: reqwest::Client::new(),
            base_url: "https://api.stripe.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Creates a one-off payment checkout session; the order id travels
    /// in the session metadata so the webhook can find its order.
    pub async fn create_checkout_session(
        &self,
        params: CreateCheckoutSessionParams,
    ) -> Result<StripeCheckoutSession, StripeError> {
        if !self.is_configured() {
            return Err(StripeError::NotConfigured);
        }

        let form: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), params.success_url),
            ("cancel_url".to_string(), params.cancel_url),
            ("customer_email".to_string(), params.customer_email),
            (
                "line_items[0][price_data][currency]".to_string(),
                params.currency,
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                params.product_name,
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                params.amount_cents.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("metadata[order_id]".to_string(), params.order_id.to_string()),
            (
                "payment_intent_data[metadata][order_id]".to_string(),
                params.order_id.to_string(),
            ),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&form)
            .send()
            .await
            .map_err(|e| StripeError::NetworkError(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Verifies the `Stripe-Signature` header and parses the payload.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
    ) -> Result<StripeWebhookEvent, StripeError> {
        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or(StripeError::NotConfigured)?;

        let mut timestamp = None;
        let mut received_sig = None;
        for element in signature.split(',') {
            let mut parts = element.trim().splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some("t"), Some(value)) => timestamp = Some(value.to_string()),
                (Some("v1"), Some(value)) => received_sig = Some(value.to_string()),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| StripeError::InvalidWebhook("Missing timestamp".to_string()))?;
        let received_sig = received_sig
            .ok_or_else(|| StripeError::InvalidWebhook("Missing signature".to_string()))?;

        let signed_payload = format!("{timestamp}.{payload}");
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| StripeError::InvalidWebhook("Invalid webhook secret".to_string()))?;
        mac.update(signed_payload.as_bytes());
        let expected_sig = hex::encode(mac.finalize().into_bytes());

        if expected_sig != received_sig {
            return Err(StripeError::InvalidWebhook("Signature mismatch".to_string()));
        }

        let timestamp_i64: i64 = timestamp
            .parse()
            .map_err(|_| StripeError::InvalidWebhook("Invalid timestamp".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let tolerance = 300;

        if (now - timestamp_i64).abs() > tolerance {
            return Err(StripeError::InvalidWebhook("Timestamp too old".to_string()));
        }

        serde_json::from_str(payload).map_err(|e| StripeError::ParseError(e.to_string()))
    }

    pub fn parse_webhook_event(
        &self,
        event: &StripeWebhookEvent,
    ) -> Result<WebhookEventType, StripeError> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                let session: StripeCheckoutSession =
                    serde_json::from_value(event.data.object.clone())
                        .map_err(|e| StripeError::ParseError(e.to_string()))?;
                Ok(WebhookEventType::CheckoutCompleted(session))
            }
            _ => Ok(WebhookEventType::Unknown(event.event_type.clone())),
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StripeError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            #[derive(Deserialize)]
            struct StripeApiError {
                error: StripeApiErrorDetail,
            }

            #[derive(Deserialize)]
            struct StripeApiErrorDetail {
                message: String,
            }

            if let Ok(error) = serde_json::from_str::<StripeApiError>(&body) {
                return Err(StripeError::ApiError(error.error.message));
            }

            return Err(StripeError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        serde_json::from_str(&body).map_err(|e| StripeError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_header(secret: &str, payload: &str, timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    fn event_payload() -> String {
        serde_json::json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "cs_test_123",
                    "payment_intent": "pi_123",
                    "customer_email": "owner@example.com",
                    "amount_total": 49900,
                    "currency": "pln",
                    "payment_status": "paid",
                    "metadata": {"order_id": "8f3e4b6a-9b3e-4a46-9d3e-111111111111"}
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_verify_webhook_accepts_valid_signature() {
        let client = StripeClient::new("sk_test".into(), Some("whsec_test".into()));
        let payload = event_payload();
        let header = signed_header("whsec_test", &payload, chrono::Utc::now().timestamp());

        let event = client.verify_webhook_signature(&payload, &header).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
    }

    #[test]
    fn test_verify_webhook_rejects_tampered_payload() {
        let client = StripeClient::new("sk_test".into(), Some("whsec_test".into()));
        let payload = event_payload();
        let header = signed_header("whsec_test", &payload, chrono::Utc::now().timestamp());

        let tampered = payload.replace("49900", "1");
        let err = client.verify_webhook_signature(&tampered, &header).unwrap_err();
        assert!(matches!(err, StripeError::InvalidWebhook(_)));
    }

    #[test]
    fn test_verify_webhook_rejects_stale_timestamp() {
        let client = StripeClient::new("sk_test".into(), Some("whsec_test".into()));
        let payload = event_payload();
        let stale = chrono::Utc::now().timestamp() - 3600;
        let header = signed_header("whsec_test", &payload, stale);

        let err = client.verify_webhook_signature(&payload, &header).unwrap_err();
        assert!(matches!(err, StripeError::InvalidWebhook(_)));
    }

    #[test]
    fn test_verify_webhook_requires_secret() {
        let client = StripeClient::new("sk_test".into(), None);
        let err = client
            .verify_webhook_signature("{}", "t=1,v1=abc")
            .unwrap_err();
        assert!(matches!(err, StripeError::NotConfigured));
    }

    #[test]
    fn test_parse_checkout_completed_event() {
        let client = StripeClient::new("sk_test".into(), None);
        let event: StripeWebhookEvent = serde_json::from_str(&event_payload()).unwrap();

        match client.parse_webhook_event(&event).unwrap() {
            WebhookEventType::CheckoutCompleted(session) => {
                assert_eq!(session.id, "cs_test_123");
                assert_eq!(session.amount_total, Some(49900));
                assert_eq!(
                    session.metadata.get("order_id").map(String::as_str),
                    Some("8f3e4b6a-9b3e-4a46-9d3e-111111111111")
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_passed_through() {
        let client = StripeClient::new("sk_test".into(), None);
        let event = StripeWebhookEvent {
            id: "evt_1".into(),
            event_type: "invoice.paid".into(),
            data: StripeWebhookData {
                object: serde_json::json!({}),
            },
            created: 0,
        };
        assert!(matches!(
            client.parse_webhook_event(&event).unwrap(),
            WebhookEventType::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn test_create_checkout_session_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/checkout/sessions")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "id": "cs_test_456",
                    "url": "https://checkout.stripe.com/pay/cs_test_456",
                    "payment_intent": null,
                    "customer_email": "owner@example.com",
                    "amount_total": 49900,
                    "currency": "pln",
                    "payment_status": "unpaid",
                    "metadata": {}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client =
            StripeClient::new("sk_test".into(), None).with_base_url(server.url());
        let session = client
            .create_checkout_session(CreateCheckoutSessionParams {
                customer_email: "owner@example.com".into(),
                product_name: "License".into(),
                amount_cents: 49900,
                currency: "pln".into(),
                order_id: Uuid::new_v4(),
                success_url: "https://example.com/ok".into(),
                cancel_url: "https://example.com/no".into(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.id, "cs_test_456");
        assert!(session.url.is_some());
    }

    #[tokio::test]
    async fn test_create_checkout_session_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/checkout/sessions")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Invalid currency"}}"#)
            .create_async()
            .await;

        let client =
            StripeClient::new("sk_test".into(), None).with_base_url(server.url());
        let err = client
            .create_checkout_session(CreateCheckoutSessionParams {
                customer_email: "owner@example.com".into(),
                product_name: "License".into(),
                amount_cents: 49900,
                currency: "zzz".into(),
                order_id: Uuid::new_v4(),
                success_url: "https://example.com/ok".into(),
                cancel_url: "https://example.com/no".into(),
            })
            .await
            .unwrap_err();

        match err {
            StripeError::ApiError(message) => assert_eq!(message, "Invalid currency"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unconfigured_client() {
        let client = StripeClient::new(String::new(), None);
        assert!(!client.is_configured());
    }
}
