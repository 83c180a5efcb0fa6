//! Outbound message delivery
//!
//! The reasoning loop and the webhook handler talk to a `DeliveryAdapter`;
//! the production implementation drives the Twilio Messages API for
//! `WhatsApp` text messages and interactive flows.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery transport failed: {0}")]
    Transport(String),
    #[error("Delivery rejected by provider (HTTP {status}): {message}")]
    Provider { status: u16, message: String },
}

impl DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Provider { status, .. } => *status >= 500,
        }
    }
}

/// Proof of a provider-accepted send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider message SID
    pub sid: String,
}

/// Interface for actually delivering messages to the counterpart
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Send a plain text message
    async fn send_text(&self, to: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError>;

    /// Send an interactive flow (structured form) by content reference
    async fn send_flow(
        &self,
        to: &str,
        flow_id: &str,
        prompt: &str,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Ensure the `WhatsApp` channel prefix is present exactly once
fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

/// Twilio Messages API client
pub struct TwilioDelivery {
    client: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

impl TwilioDelivery {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        let base_url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Messages.json"
        );
        Self::with_base_url(account_sid, auth_token, from_number, base_url)
    }

    /// Construct against an explicit endpoint (tests point this at a stub)
    pub fn with_base_url(
        account_sid: String,
        auth_token: String,
        from_number: String,
        base_url: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            account_sid,
            auth_token,
            from_number,
            base_url,
        }
    }

    /// Post one form-encoded message, retrying exactly once on transport or
    /// provider-side (5xx) failure.
    async fn post_message(&self, form: &[(&str, &str)]) -> Result<DeliveryReceipt, DeliveryError> {
        match self.post_once(form).await {
            Ok(receipt) => Ok(receipt),
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Delivery failed, retrying once");
                self.post_once(form).await
            }
            Err(e) => Err(e),
        }
    }

    async fn post_once(&self, form: &[(&str, &str)]) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(&self.base_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<TwilioErrorBody>(&body)
                .map_or(body, |err| err.message);
            return Err(DeliveryError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TwilioMessageBody = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::Transport(format!("Unparseable provider reply: {e}")))?;

        Ok(DeliveryReceipt { sid: parsed.sid })
    }
}

#[async_trait]
impl DeliveryAdapter for TwilioDelivery {
    async fn send_text(&self, to: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let from = whatsapp_address(&self.from_number);
        let to = whatsapp_address(to);

        let receipt = self
            .post_message(&[("From", from.as_str()), ("To", to.as_str()), ("Body", body)])
            .await?;

        tracing::info!(to = %to, sid = %receipt.sid, "WhatsApp message sent");
        Ok(receipt)
    }

    async fn send_flow(
        &self,
        to: &str,
        flow_id: &str,
        prompt: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let from = whatsapp_address(&self.from_number);
        let to = whatsapp_address(to);
        let variables = serde_json::json!({ "cta_text": prompt }).to_string();

        let receipt = self
            .post_message(&[
                ("From", from.as_str()),
                ("To", to.as_str()),
                ("ContentSid", flow_id),
                ("ContentVariables", variables.as_str()),
            ])
            .await?;

        tracing::info!(to = %to, flow_id = %flow_id, sid = %receipt.sid, "WhatsApp flow sent");
        Ok(receipt)
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageBody {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve a stub provider on an ephemeral port, returning its URL
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn delivery_against(url: String) -> TwilioDelivery {
        TwilioDelivery::with_base_url(
            "AC_test".to_string(),
            "token".to_string(),
            "+15550000000".to_string(),
            url,
        )
    }

    #[tokio::test]
    async fn test_transient_provider_failure_is_retried_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/",
            post(move || {
                let hits = counter.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(serde_json::json!({"message": "busy"})),
                        )
                    } else {
                        (
                            StatusCode::CREATED,
                            Json(serde_json::json!({"sid": "SM123"})),
                        )
                    }
                }
            }),
        );

        let delivery = delivery_against(serve(app).await);
        let receipt = delivery.send_text("+15551112222", "hello").await.unwrap();

        assert_eq!(receipt.sid, "SM123");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_rejection_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/",
            post(move || {
                let hits = counter.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"message": "invalid number"})),
                    )
                }
            }),
        );

        let delivery = delivery_against(serve(app).await);
        let err = delivery.send_text("+15551112222", "hello").await;

        match err {
            Err(DeliveryError::Provider { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid number");
            }
            other => panic!("expected provider rejection, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_whatsapp_prefix_applied_once() {
        assert_eq!(whatsapp_address("+15550001111"), "whatsapp:+15550001111");
        assert_eq!(
            whatsapp_address("whatsapp:+15550001111"),
            "whatsapp:+15550001111"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(DeliveryError::Transport("timeout".into()).is_retryable());
        assert!(DeliveryError::Provider {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!DeliveryError::Provider {
            status: 400,
            message: "bad number".into()
        }
        .is_retryable());
    }
}
