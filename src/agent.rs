//! The reasoning loop
//!
//! One inbound message in, at most one outbound reply out. The loop replays
//! the thread, resolves the conversation stage from persisted state, and
//! lets the model act only through the stage's tool subset. Tool failures
//! are re-injected as error tool-results for the model to phrase around; a
//! bounded iteration cap converts runaway turns into a fixed fallback
//! reply.

use crate::db::{derive_thread_id, Database, DbError, Turn, TurnContent};
use crate::delivery::{DeliveryAdapter, DeliveryError, DeliveryReceipt};
use crate::llm::{ContentBlock, LlmError, LlmMessage, LlmRequest, LlmResponse, LlmService};
use crate::prompts;
use crate::stage;
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on model round-trips per inbound message. Bounds worst-case
/// latency and spend; hitting it yields the fallback reply.
const MAX_LOOP_TURNS: usize = 8;

/// Reply of last resort when the loop cannot produce one normally
const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble keeping up right now. Give me a minute and message me again.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("No proof flow configured")]
    NoFlowConfigured,
}

/// The conversation orchestrator: store + model + channel
pub struct Agent {
    db: Database,
    llm: Arc<dyn LlmService>,
    delivery: Arc<dyn DeliveryAdapter>,
    default_flow_id: Option<String>,
}

impl Agent {
    pub fn new(
        db: Database,
        llm: Arc<dyn LlmService>,
        delivery: Arc<dyn DeliveryAdapter>,
        default_flow_id: Option<String>,
    ) -> Self {
        Self {
            db,
            llm,
            delivery,
            default_flow_id,
        }
    }

    /// Handle one inbound message, returning the outbound reply (or `None`
    /// when the model ends its turn without one, e.g. after an explicit
    /// `send_message`).
    pub async fn handle_inbound(
        &self,
        address: &str,
        body: &str,
    ) -> Result<Option<String>, AgentError> {
        let (_, created) = self.db.get_or_create_account(address)?;
        if created {
            tracing::info!(address = %address, "First contact, account created");
        }

        let thread_id = derive_thread_id(address);
        self.db.append_turn(&thread_id, &TurnContent::user(body))?;

        // Stage is resolved from persisted state, never from the dialogue,
        // so a previous turn's committed effects are always reflected here.
        let snapshot = self.db.account_snapshot(address)?;
        let current_stage = stage::resolve(&snapshot);
        tracing::info!(address = %address, stage = %current_stage, "Handling inbound message");

        let registry = ToolRegistry::for_stage(current_stage);
        let system = prompts::stage_instructions(current_stage, snapshot.name.as_deref());
        let ctx = ToolContext::new(
            self.db.clone(),
            self.delivery.clone(),
            address,
            self.default_flow_id.clone(),
        );

        for iteration in 0..MAX_LOOP_TURNS {
            let turns = self.db.get_turns(&thread_id)?;
            let request = LlmRequest {
                system: system.clone(),
                messages: build_llm_messages(&turns),
                tools: registry.definitions(),
                max_tokens: Some(1024),
            };

            let response = match self.complete_with_retry(&request).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(address = %address, error = %e, "LLM request failed, falling back");
                    return self.fall_back(&thread_id);
                }
            };

            self.db
                .append_turn(&thread_id, &TurnContent::assistant(response.content.clone()))?;

            if !response.has_tool_use() {
                let text = response.text();
                let reply = if text.trim().is_empty() { None } else { Some(text) };
                return Ok(reply);
            }

            for (id, name, input) in response.tool_uses() {
                let output = match registry.execute(name, input.clone(), &ctx).await {
                    Some(out) => out,
                    // Not in this stage's subset: reject without side effect
                    // and let the model read the refusal.
                    None => {
                        tracing::warn!(
                            address = %address,
                            stage = %current_stage,
                            tool = %name,
                            "Rejected tool outside stage subset"
                        );
                        ToolOutput::error(format!("Unknown tool: {name}"))
                    }
                };
                self.db.append_turn(
                    &thread_id,
                    &TurnContent::tool(id, output.output, !output.success),
                )?;
            }

            tracing::debug!(address = %address, iteration, "Loop iteration complete");
        }

        tracing::warn!(address = %address, cap = MAX_LOOP_TURNS, "Iteration cap reached");
        self.fall_back(&thread_id)
    }

    /// Thin passthrough for proof-form requests: resolves the active
    /// commitment so the form is only ever offered against a live goal.
    pub async fn request_proof_form(
        &self,
        address: &str,
        flow_id: Option<&str>,
    ) -> Result<DeliveryReceipt, AgentError> {
        let account = self.db.get_account(address)?;
        let commitment = self.db.active_commitment(&account.id)?;

        let flow = match flow_id {
            Some(flow) => flow,
            None => self
                .default_flow_id
                .as_deref()
                .ok_or(AgentError::NoFlowConfigured)?,
        };

        tracing::info!(
            address = %address,
            commitment_id = %commitment.id,
            flow_id = %flow,
            "Requesting proof form"
        );
        Ok(self.delivery.send_flow(address, flow, "Submit Proof").await?)
    }

    async fn complete_with_retry(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match self.llm.complete(request).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Retryable LLM failure, retrying once");
                self.llm.complete(request).await
            }
            other => other,
        }
    }

    fn fall_back(&self, thread_id: &str) -> Result<Option<String>, AgentError> {
        self.db.append_turn(
            thread_id,
            &TurnContent::assistant(vec![ContentBlock::text(FALLBACK_REPLY)]),
        )?;
        Ok(Some(FALLBACK_REPLY.to_string()))
    }
}

/// Replay stored turns as LLM messages. Tool results ride in user-role
/// messages as `tool_result` blocks, mirroring how they were produced.
fn build_llm_messages(turns: &[Turn]) -> Vec<LlmMessage> {
    let mut messages = Vec::with_capacity(turns.len());

    for turn in turns {
        match &turn.content {
            TurnContent::User { text } => {
                messages.push(LlmMessage::user(vec![ContentBlock::text(text)]));
            }
            TurnContent::Assistant { blocks } => {
                messages.push(LlmMessage::assistant(blocks.clone()));
            }
            TurnContent::Tool {
                tool_use_id,
                content,
                is_error,
            } => {
                messages.push(LlmMessage::user(vec![ContentBlock::tool_result(
                    tool_use_id,
                    content,
                    *is_error,
                )]));
            }
        }
    }

    messages
}
