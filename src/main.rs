//! Momentum - `WhatsApp` accountability coaching agent
//!
//! A stage-resolving conversation loop around an LLM with per-stage tool
//! binding, persisting accounts, commitments, verifications, and
//! transcripts in `SQLite`.

mod agent;
mod api;
mod config;
mod db;
mod delivery;
mod llm;
mod prompts;
mod stage;
mod tools;

use agent::Agent;
use api::{create_router, AppState};
use config::Config;
use db::Database;
use delivery::{DeliveryAdapter, TwilioDelivery};
use llm::{LlmService, OpenAiService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "momentum=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    let llm: Arc<dyn LlmService> = Arc::new(OpenAiService::new(
        config.openai_api_key.clone(),
        config.model.clone(),
        config.llm_base_url.as_deref(),
    ));

    let delivery: Arc<dyn DeliveryAdapter> = Arc::new(TwilioDelivery::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_from_number.clone(),
    ));

    if config.whatsapp_flow_id.is_none() {
        tracing::warn!("WHATSAPP_FLOW_ID not set; proof-form requests will be rejected");
    }

    let agent = Agent::new(
        db,
        llm,
        delivery.clone(),
        config.whatsapp_flow_id.clone(),
    );

    let state = AppState {
        agent: Arc::new(agent),
        delivery,
    };

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(model = %config.model, "Momentum listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
