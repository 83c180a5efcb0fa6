//! Account lookup and onboarding tools

use super::{Tool, ToolContext, ToolError, ToolOutput};
use crate::stage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Resolve the account's conversation stage, lazily creating the account
/// row on first contact. Idempotent.
pub struct AccountStatusTool;

#[async_trait]
impl Tool for AccountStatusTool {
    fn name(&self) -> &'static str {
        "get_account_status"
    }

    fn description(&self) -> String {
        "Look up the current user's account status. Creates the account record if this is \
their very first contact. Returns one of: 'new_user' (no name recorded yet), \
'user_exists_no_goal' (onboarded, no active commitment), 'user_exists_active_goal' \
(active commitment in progress), with the user's name when known."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(status(ctx))
    }
}

fn status(ctx: &ToolContext) -> Result<String, ToolError> {
    let (_, created) = ctx.db.get_or_create_account(&ctx.address)?;
    if created {
        tracing::info!(address = %ctx.address, "New account created");
    }

    let snapshot = ctx.db.account_snapshot(&ctx.address)?;
    let resolved = stage::resolve(&snapshot);

    Ok(match snapshot.name {
        Some(name) => format!("{resolved}:{name}"),
        None => resolved.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct UpdateNameInput {
    name: String,
}

/// Record the user's first name during onboarding. Idempotent.
pub struct UpdateNameTool;

#[async_trait]
impl Tool for UpdateNameTool {
    fn name(&self) -> &'static str {
        "update_account_name"
    }

    fn description(&self) -> String {
        "Save the user's first name once they have told you what it is. Call this exactly \
once per provided name."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The user's first name"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(update_name(input, ctx))
    }
}

fn update_name(input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
    let input: UpdateNameInput = serde_json::from_value(input)
        .map_err(|e| ToolError::Validation(format!("Invalid input: {e}")))?;

    let name = input.name.trim();
    if name.is_empty() {
        return Err(ToolError::Validation("name must not be empty".to_string()));
    }

    ctx.db.set_account_name(&ctx.address, name)?;
    Ok(format!("Saved the user's name as {name}."))
}
