//! Tool implementations for the coaching agent
//!
//! Each tool is a named, schema-validated operation against the store or
//! the messaging channel. The registry is built per resolved stage, so the
//! reasoning loop can only ever reach the tools that are legal right now;
//! an out-of-stage call is an unknown name, not a side effect.

mod account;
mod commitment;
mod messaging;
mod verification;

pub use account::{AccountStatusTool, UpdateNameTool};
pub use commitment::{ActiveCommitmentTool, CreateCommitmentTool};
pub use messaging::{RequestProofFlowTool, SendMessageTool};
pub use verification::CreateVerificationTool;

#[cfg(test)]
mod proptests;

use crate::db::{Database, DbError};
use crate::delivery::{DeliveryAdapter, DeliveryError};
use crate::stage::Stage;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Tool failure taxonomy. Every variant is recoverable: the loop re-injects
/// the message as an error tool-result and lets the model phrase a
/// corrective reply.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Delivery error: {0}")]
    Delivery(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<DbError> for ToolError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::AccountNotFound(_) | DbError::CommitmentNotFound(_) => {
                ToolError::NotFound(e.to_string())
            }
            DbError::ActiveCommitmentExists(_) => ToolError::Conflict(e.to_string()),
            DbError::Sqlite(_) => ToolError::Storage(e.to_string()),
        }
    }
}

impl From<DeliveryError> for ToolError {
    fn from(e: DeliveryError) -> Self {
        ToolError::Delivery(e.to_string())
    }
}

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

impl From<Result<String, ToolError>> for ToolOutput {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(output) => ToolOutput::success(output),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}

/// Per-invocation context: the store, the channel, and the counterpart the
/// current turn belongs to. Tools never take the address as model input;
/// binding it here keeps one account's turn from touching another account.
#[derive(Clone)]
pub struct ToolContext {
    pub db: Database,
    pub delivery: Arc<dyn DeliveryAdapter>,
    pub address: String,
    pub default_flow_id: Option<String>,
}

impl ToolContext {
    pub fn new(
        db: Database,
        delivery: Arc<dyn DeliveryAdapter>,
        address: impl Into<String>,
        default_flow_id: Option<String>,
    ) -> Self {
        Self {
            db,
            delivery,
            address: address.into(),
            default_flow_id,
        }
    }
}

/// Trait for tools callable by the reasoning loop
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &'static str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput;
}

/// The set of tools legal for one conversation stage
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build the stage-legal subset. `get_account_status` and
    /// `send_message` carry no persisted-state precondition and are legal
    /// everywhere; everything else is bound to exactly one stage.
    pub fn for_stage(stage: Stage) -> Self {
        let mut tools: Vec<Arc<dyn Tool>> =
            vec![Arc::new(AccountStatusTool), Arc::new(SendMessageTool)];

        match stage {
            Stage::NewUser => {
                tools.push(Arc::new(UpdateNameTool));
            }
            Stage::UserExistsNoGoal => {
                tools.push(Arc::new(CreateCommitmentTool));
            }
            Stage::UserExistsActiveGoal => {
                tools.push(Arc::new(ActiveCommitmentTool));
                tools.push(Arc::new(CreateVerificationTool));
                tools.push(Arc::new(RequestProofFlowTool));
            }
        }

        Self { tools }
    }

    /// Get all tool definitions for the LLM request
    pub fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| crate::llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Whether a tool name is legal in this registry
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Execute a tool by name; `None` means the name is not legal here
    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext) -> Option<ToolOutput> {
        for tool in &self.tools {
            if tool.name() == name {
                tracing::info!(tool = %name, address = %ctx.address, "Executing tool");
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}
