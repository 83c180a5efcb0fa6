//! Channel-side tools: outbound messages and proof-submission flows

use super::{Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct SendMessageInput {
    body: String,
}

/// Send a standalone `WhatsApp` message to the current user. The delivery is
/// externally visible and not reversible.
pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &'static str {
        "send_message"
    }

    fn description(&self) -> String {
        "Send a WhatsApp message to the user right now, separate from your final reply. \
Only use this when an extra standalone message genuinely helps; normally just answer."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["body"],
            "properties": {
                "body": {
                    "type": "string",
                    "description": "The message text to send"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(send(input, ctx).await)
    }
}

async fn send(input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
    let input: SendMessageInput = serde_json::from_value(input)
        .map_err(|e| ToolError::Validation(format!("Invalid input: {e}")))?;

    if input.body.trim().is_empty() {
        return Err(ToolError::Validation("body must not be empty".to_string()));
    }

    let receipt = ctx.delivery.send_text(&ctx.address, &input.body).await?;
    Ok(format!("Message sent (sid: {}).", receipt.sid))
}

#[derive(Debug, Deserialize)]
struct RequestProofFlowInput {
    #[serde(default)]
    flow_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Send the interactive proof-submission form for the active commitment
pub struct RequestProofFlowTool;

#[async_trait]
impl Tool for RequestProofFlowTool {
    fn name(&self) -> &'static str {
        "request_proof_flow"
    }

    fn description(&self) -> String {
        "Send the user the interactive proof-submission form for their active commitment. \
Use when they want to submit photo proof."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flow_id": {
                    "type": "string",
                    "description": "Override the configured proof flow reference"
                },
                "prompt": {
                    "type": "string",
                    "description": "Call-to-action text shown on the form button"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(request_flow(input, ctx).await)
    }
}

async fn request_flow(input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
    let input: RequestProofFlowInput = serde_json::from_value(input)
        .map_err(|e| ToolError::Validation(format!("Invalid input: {e}")))?;

    // The flow only makes sense against an active goal.
    let account = ctx.db.get_account(&ctx.address)?;
    ctx.db
        .active_commitment(&account.id)
        .map_err(|_| ToolError::NotFound("no active commitment for this user".to_string()))?;

    let flow_id = input
        .flow_id
        .or_else(|| ctx.default_flow_id.clone())
        .ok_or_else(|| {
            ToolError::Validation("no proof flow configured for this deployment".to_string())
        })?;

    let prompt = input.prompt.as_deref().unwrap_or("Submit Proof");
    let receipt = ctx.delivery.send_flow(&ctx.address, &flow_id, prompt).await?;
    Ok(format!("Proof form sent (sid: {}).", receipt.sid))
}
