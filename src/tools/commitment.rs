//! Commitment creation and retrieval tools

use super::{Tool, ToolContext, ToolError, ToolOutput};
use crate::db::{Commitment, NewCommitment, Schedule, StakeType};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct CreateCommitmentInput {
    goal_description: String,
    #[serde(default)]
    task_description: Option<String>,
    start_date: String,
    end_date: String,
    stake_amount: f64,
    #[serde(default)]
    stake_type: Option<String>,
    #[serde(default)]
    schedule: Option<Schedule>,
    verification_method: String,
}

/// Create the account's commitment once every required field has been
/// collected. The tool re-validates everything the prompt promises, so a
/// premature or malformed call fails loudly instead of persisting garbage.
pub struct CreateCommitmentTool;

#[async_trait]
impl Tool for CreateCommitmentTool {
    fn name(&self) -> &'static str {
        "create_commitment"
    }

    fn description(&self) -> String {
        "Create the user's commitment once ALL required details are known: goal description, \
start date, end date, stake amount, and verification method. Dates are YYYY-MM-DD; the stake \
amount must be positive; stake_type is 'per_missed_period' or 'one_time_on_failure' \
(default); schedule defaults to daily."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["goal_description", "start_date", "end_date", "stake_amount", "verification_method"],
            "properties": {
                "goal_description": {
                    "type": "string",
                    "description": "High-level description of the goal"
                },
                "task_description": {
                    "type": "string",
                    "description": "The concrete recurring task, if distinct from the goal"
                },
                "start_date": {
                    "type": "string",
                    "description": "Start date, YYYY-MM-DD"
                },
                "end_date": {
                    "type": "string",
                    "description": "End date, YYYY-MM-DD"
                },
                "stake_amount": {
                    "type": "number",
                    "description": "Amount of money at stake, must be positive"
                },
                "stake_type": {
                    "type": "string",
                    "enum": ["per_missed_period", "one_time_on_failure"],
                    "description": "How the stake is forfeited"
                },
                "schedule": {
                    "type": "object",
                    "description": "Cadence, e.g. {\"frequency\":\"daily\"} or {\"frequency\":\"weekly\",\"days\":[\"monday\"]}"
                },
                "verification_method": {
                    "type": "string",
                    "description": "How completion will be proven, e.g. 'daily photo'"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(create(input, ctx))
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ToolError::Validation(format!(
            "{field} must be an ISO calendar date (YYYY-MM-DD), got '{value}'"
        ))
    })
}

fn validate(input: CreateCommitmentInput) -> Result<NewCommitment, ToolError> {
    if input.goal_description.trim().is_empty() {
        return Err(ToolError::Validation(
            "goal_description must not be empty".to_string(),
        ));
    }
    if input.verification_method.trim().is_empty() {
        return Err(ToolError::Validation(
            "verification_method must not be empty".to_string(),
        ));
    }

    let start = parse_date("start_date", &input.start_date)?;
    let end = parse_date("end_date", &input.end_date)?;
    if end < start {
        return Err(ToolError::Validation(format!(
            "end_date {end} is before start_date {start}"
        )));
    }

    if !(input.stake_amount.is_finite() && input.stake_amount > 0.0) {
        return Err(ToolError::Validation(format!(
            "stake_amount must be positive, got {}",
            input.stake_amount
        )));
    }

    let stake_type = match input.stake_type.as_deref() {
        None => StakeType::OneTimeOnFailure,
        Some(s) => StakeType::parse(s).ok_or_else(|| {
            ToolError::Validation(format!(
                "stake_type must be 'per_missed_period' or 'one_time_on_failure', got '{s}'"
            ))
        })?,
    };

    Ok(NewCommitment {
        goal_description: input.goal_description,
        task_description: input.task_description,
        start_date: input.start_date,
        end_date: input.end_date,
        stake_amount: input.stake_amount,
        stake_type,
        schedule: input.schedule.unwrap_or_default(),
        verification_method: Some(input.verification_method),
    })
}

fn create(input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
    let input: CreateCommitmentInput = serde_json::from_value(input)
        .map_err(|e| ToolError::Validation(format!("Invalid input: {e}")))?;
    let new = validate(input)?;

    let account = ctx.db.get_account(&ctx.address)?;
    let commitment = ctx.db.create_commitment(&account.id, &new)?;

    tracing::info!(
        address = %ctx.address,
        commitment_id = %commitment.id,
        stake = commitment.stake_amount,
        "Commitment created"
    );

    Ok(format!(
        "Commitment created. Goal: {}. Stake: ${} ({}). Period: {} to {}. Verification: {}.",
        commitment.goal_description,
        commitment.stake_amount,
        commitment.stake_type,
        commitment.start_date,
        commitment.end_date,
        commitment.verification_method.as_deref().unwrap_or("not specified"),
    ))
}

/// Retrieve the active commitment, formatted for conversational use
pub struct ActiveCommitmentTool;

#[async_trait]
impl Tool for ActiveCommitmentTool {
    fn name(&self) -> &'static str {
        "get_active_commitment"
    }

    fn description(&self) -> String {
        "Retrieve the user's active commitment: goal, task, stake, period, schedule, \
verification method, and the commitment id (needed to record verifications)."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(active(ctx))
    }
}

fn active(ctx: &ToolContext) -> Result<String, ToolError> {
    let account = ctx.db.get_account(&ctx.address)?;
    let commitment = ctx
        .db
        .active_commitment(&account.id)
        .map_err(|_| ToolError::NotFound("no active commitment for this user".to_string()))?;

    Ok(describe(&commitment))
}

fn describe(c: &Commitment) -> String {
    format!(
        "Active goal: {}\nTask: {}\nStake: ${} ({})\nPeriod: {} to {}\nSchedule: {}\nVerification: {}\nCommitment ID: {}",
        c.goal_description,
        c.task_description.as_deref().unwrap_or("not specified"),
        c.stake_amount,
        c.stake_type,
        c.start_date,
        c.end_date,
        c.schedule,
        c.verification_method.as_deref().unwrap_or("not specified"),
        c.id,
    )
}
