//! Database schema and record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    address TEXT NOT NULL UNIQUE,
    name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS commitments (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    goal_description TEXT NOT NULL,
    task_description TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    stake_amount REAL NOT NULL,
    stake_type TEXT NOT NULL,
    schedule TEXT NOT NULL,
    verification_method TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,

    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

-- At most one active commitment per account, enforced at the store
-- boundary so concurrent creates resolve to one winner and one conflict.
CREATE UNIQUE INDEX IF NOT EXISTS idx_commitments_one_active
    ON commitments(account_id) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS verifications (
    id TEXT PRIMARY KEY,
    commitment_id TEXT NOT NULL,
    due_date TEXT NOT NULL,
    proof_reference TEXT,
    justification TEXT,
    status TEXT NOT NULL DEFAULT 'completed_on_time',
    created_at TEXT NOT NULL,

    FOREIGN KEY (commitment_id) REFERENCES commitments(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_verifications_commitment
    ON verifications(commitment_id, due_date);

CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_thread ON turns(thread_id, sequence_id);
";

/// Derive the transcript thread id for an external address.
///
/// Pure and injective: the address is carried verbatim under a fixed
/// namespace prefix, so distinct addresses can never share a thread and the
/// same address always maps to the same thread.
pub fn derive_thread_id(address: &str) -> String {
    format!("wa:{address}")
}

/// Account record: one per external address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub address: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stake forfeiture policy for a commitment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeType {
    PerMissedPeriod,
    OneTimeOnFailure,
}

impl StakeType {
    /// Parse the wire name used in tool arguments and the store
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "per_missed_period" => Some(StakeType::PerMissedPeriod),
            "one_time_on_failure" => Some(StakeType::OneTimeOnFailure),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StakeType::PerMissedPeriod => "per_missed_period",
            StakeType::OneTimeOnFailure => "one_time_on_failure",
        }
    }
}

impl fmt::Display for StakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commitment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Active,
    Closed,
}

/// Verification cadence for a commitment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly { days: Vec<String> },
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily => f.write_str("daily"),
            Schedule::Weekly { days } => write!(f, "weekly ({})", days.join(", ")),
        }
    }
}

/// Commitment record: a goal under accountability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    pub account_id: String,
    pub goal_description: String,
    pub task_description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub stake_amount: f64,
    pub stake_type: StakeType,
    pub schedule: Schedule,
    pub verification_method: Option<String>,
    pub status: CommitmentStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a commitment (validated by the tool layer)
#[derive(Debug, Clone)]
pub struct NewCommitment {
    pub goal_description: String,
    pub task_description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub stake_amount: f64,
    pub stake_type: StakeType,
    pub schedule: Schedule,
    pub verification_method: Option<String>,
}

/// Verification record: one proof submission against a commitment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub id: String,
    pub commitment_id: String,
    pub due_date: String,
    pub proof_reference: Option<String>,
    pub justification: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Role of a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => f.write_str("user"),
            TurnRole::Assistant => f.write_str("assistant"),
            TurnRole::Tool => f.write_str("tool"),
        }
    }
}

fn parse_turn_role(s: &str) -> Option<TurnRole> {
    match s {
        "user" => Some(TurnRole::User),
        "assistant" => Some(TurnRole::Assistant),
        "tool" => Some(TurnRole::Tool),
        _ => None,
    }
}

/// Payload of a transcript turn, discriminated by role
#[derive(Debug, Clone, PartialEq)]
pub enum TurnContent {
    /// Inbound message text
    User { text: String },
    /// Model output: text and/or tool-use blocks, stored as the LLM
    /// content-block JSON so the transcript replays losslessly
    Assistant { blocks: Vec<crate::llm::ContentBlock> },
    /// Structured result of one tool invocation
    Tool {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl TurnContent {
    pub fn user(text: impl Into<String>) -> Self {
        TurnContent::User { text: text.into() }
    }

    pub fn assistant(blocks: Vec<crate::llm::ContentBlock>) -> Self {
        TurnContent::Assistant { blocks }
    }

    pub fn tool(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        TurnContent::Tool {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn role(&self) -> TurnRole {
        match self {
            TurnContent::User { .. } => TurnRole::User,
            TurnContent::Assistant { .. } => TurnRole::Assistant,
            TurnContent::Tool { .. } => TurnRole::Tool,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TurnContent::User { text } => serde_json::json!({ "text": text }),
            TurnContent::Assistant { blocks } => {
                serde_json::to_value(blocks).unwrap_or(Value::Null)
            }
            TurnContent::Tool {
                tool_use_id,
                content,
                is_error,
            } => serde_json::json!({
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }),
        }
    }

    /// Reconstruct a payload from its stored JSON, using the role column as
    /// the discriminator
    pub fn from_json(role: TurnRole, value: &Value) -> Option<Self> {
        match role {
            TurnRole::User => Some(TurnContent::User {
                text: value.get("text")?.as_str()?.to_string(),
            }),
            TurnRole::Assistant => Some(TurnContent::Assistant {
                blocks: serde_json::from_value(value.clone()).ok()?,
            }),
            TurnRole::Tool => Some(TurnContent::Tool {
                tool_use_id: value.get("tool_use_id")?.as_str()?.to_string(),
                content: value.get("content")?.as_str()?.to_string(),
                is_error: value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
        }
    }
}

impl Serialize for TurnContent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One transcript turn as stored
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub id: String,
    pub thread_id: String,
    pub sequence_id: i64,
    pub role: TurnRole,
    pub content: TurnContent,
    pub created_at: DateTime<Utc>,
}

pub(super) fn parse_role_or_user(s: &str) -> TurnRole {
    parse_turn_role(s).unwrap_or(TurnRole::User)
}
