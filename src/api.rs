//! HTTP transport: provider webhook, proof-flow endpoint, health probe
//!
//! The webhook is deliberately forgiving: once a payload parses, agent
//! failures are logged and acknowledged so the provider does not
//! retry-storm a struggling deployment. Signature validation belongs to a
//! fronting proxy, not this handler.

use crate::agent::{Agent, AgentError};
use crate::db::DbError;
use crate::delivery::DeliveryAdapter;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub delivery: Arc<dyn DeliveryAdapter>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/flows/request", post(request_flow))
        .route("/health", get(health))
        .with_state(state)
}

// ============================================================
// Webhook
// ============================================================

/// Twilio webhook form payload (capitalized field names are the provider's)
#[derive(Debug, Deserialize)]
pub struct WebhookForm {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub status: &'static str,
}

async fn webhook(
    State(state): State<AppState>,
    Form(payload): Form<WebhookForm>,
) -> Result<Json<WebhookAck>, AppError> {
    if payload.from.is_empty() || payload.body.is_empty() {
        return Err(AppError::BadRequest(
            "Missing message body or sender number".to_string(),
        ));
    }

    tracing::info!(from = %payload.from, "Webhook message received");

    match state.agent.handle_inbound(&payload.from, &payload.body).await {
        Ok(Some(reply)) => {
            if let Err(e) = state.delivery.send_text(&payload.from, &reply).await {
                // The turn stays in the transcript; the user simply didn't
                // get this reply. Next inbound message self-corrects.
                tracing::error!(from = %payload.from, error = %e, "Reply delivery failed");
            }
        }
        Ok(None) => {
            tracing::debug!(from = %payload.from, "Turn produced no outbound reply");
        }
        Err(e) => {
            tracing::error!(from = %payload.from, error = %e, "Inbound handling failed");
        }
    }

    Ok(Json(WebhookAck { status: "ok" }))
}

// ============================================================
// Proof flow
// ============================================================

#[derive(Debug, Deserialize)]
pub struct FlowRequest {
    pub address: String,
    #[serde(default)]
    pub flow_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub sid: String,
}

async fn request_flow(
    State(state): State<AppState>,
    Json(req): Json<FlowRequest>,
) -> Result<Json<FlowResponse>, AppError> {
    let receipt = state
        .agent
        .request_proof_form(&req.address, req.flow_id.as_deref())
        .await
        .map_err(AppError::from)?;

    Ok(Json(FlowResponse { sid: receipt.sid }))
}

// ============================================================
// Health
// ============================================================

async fn health() -> Json<WebhookAck> {
    Json(WebhookAck { status: "ok" })
}

// ============================================================
// Errors
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl From<AgentError> for AppError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Db(DbError::AccountNotFound(_) | DbError::CommitmentNotFound(_)) => {
                AppError::NotFound(e.to_string())
            }
            AgentError::NoFlowConfigured => AppError::BadRequest(e.to_string()),
            AgentError::Delivery(_) => AppError::Upstream(e.to_string()),
            AgentError::Db(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Upstream(m) => (StatusCode::BAD_GATEWAY, m),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService, Usage};
    use crate::tools::testing::{RecordingDelivery, Sent};
    use async_trait::async_trait;

    /// Single-shot LLM fake that always replies with the same text
    struct EchoLlm(String);

    #[async_trait]
    impl LlmService for EchoLlm {
        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: vec![ContentBlock::text(&self.0)],
                usage: Usage::default(),
            })
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    fn test_state(reply: &str) -> (AppState, Arc<RecordingDelivery>, Database) {
        let db = Database::open_in_memory().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let agent = Agent::new(
            db.clone(),
            Arc::new(EchoLlm(reply.to_string())),
            delivery.clone(),
            Some("FLOW_DEFAULT".to_string()),
        );
        (
            AppState {
                agent: Arc::new(agent),
                delivery: delivery.clone(),
            },
            delivery,
            db,
        )
    }

    #[tokio::test]
    async fn test_webhook_acks_and_delivers_reply() {
        let (state, delivery, _db) = test_state("What's your first name?");

        let ack = webhook(
            State(state),
            Form(WebhookForm {
                from: "whatsapp:+15550700001".to_string(),
                body: "Hi".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(ack.0, WebhookAck { status: "ok" });
        assert_eq!(
            delivery.sent(),
            vec![Sent::Text {
                to: "whatsapp:+15550700001".to_string(),
                body: "What's your first name?".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_webhook_rejects_empty_payload() {
        let (state, _, _db) = test_state("unused");

        let err = webhook(
            State(state),
            Form(WebhookForm {
                from: String::new(),
                body: "Hi".to_string(),
            }),
        )
        .await;

        assert!(matches!(err, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_flow_request_without_goal_is_not_found() {
        let (state, _, db) = test_state("unused");
        db.get_or_create_account("whatsapp:+15550700002").unwrap();

        let err = request_flow(
            State(state),
            Json(FlowRequest {
                address: "whatsapp:+15550700002".to_string(),
                flow_id: None,
            }),
        )
        .await;

        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_flow_request_sends_flow_for_active_goal() {
        let (state, delivery, db) = test_state("unused");

        let (account, _) = db.get_or_create_account("whatsapp:+15550700003").unwrap();
        db.set_account_name("whatsapp:+15550700003", "Alex").unwrap();
        db.create_commitment(
            &account.id,
            &crate::db::NewCommitment {
                goal_description: "Write daily".to_string(),
                task_description: None,
                start_date: "2024-01-01".to_string(),
                end_date: "2024-02-01".to_string(),
                stake_amount: 25.0,
                stake_type: crate::db::StakeType::OneTimeOnFailure,
                schedule: crate::db::Schedule::Daily,
                verification_method: Some("screenshot".to_string()),
            },
        )
        .unwrap();

        let resp = request_flow(
            State(state),
            Json(FlowRequest {
                address: "whatsapp:+15550700003".to_string(),
                flow_id: None,
            }),
        )
        .await
        .unwrap();

        assert!(!resp.0.sid.is_empty());
        assert_eq!(
            delivery.sent(),
            vec![Sent::Flow {
                to: "whatsapp:+15550700003".to_string(),
                flow_id: "FLOW_DEFAULT".to_string(),
            }]
        );
    }
}
