//! Verification recording tool

use super::{Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct CreateVerificationInput {
    commitment_id: String,
    due_date: String,
    #[serde(default)]
    proof_reference: Option<String>,
    #[serde(default)]
    justification: Option<String>,
}

/// Append a proof record against a commitment. Records default to
/// completed-on-time; content review of the proof itself happens elsewhere.
pub struct CreateVerificationTool;

#[async_trait]
impl Tool for CreateVerificationTool {
    fn name(&self) -> &'static str {
        "create_verification"
    }

    fn description(&self) -> String {
        "Record a completed verification for the user's commitment. Use the commitment id \
from get_active_commitment, the date the task was due (YYYY-MM-DD), and any proof link or \
written justification the user provided."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["commitment_id", "due_date"],
            "properties": {
                "commitment_id": {
                    "type": "string",
                    "description": "Id of the commitment being verified"
                },
                "due_date": {
                    "type": "string",
                    "description": "Due date for this verification, YYYY-MM-DD"
                },
                "proof_reference": {
                    "type": "string",
                    "description": "URL or reference to the submitted proof"
                },
                "justification": {
                    "type": "string",
                    "description": "The user's written explanation"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput {
        ToolOutput::from(record(input, ctx))
    }
}

fn record(input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
    let input: CreateVerificationInput = serde_json::from_value(input)
        .map_err(|e| ToolError::Validation(format!("Invalid input: {e}")))?;

    NaiveDate::parse_from_str(&input.due_date, "%Y-%m-%d").map_err(|_| {
        ToolError::Validation(format!(
            "due_date must be an ISO calendar date (YYYY-MM-DD), got '{}'",
            input.due_date
        ))
    })?;

    let verification = ctx.db.create_verification(
        &input.commitment_id,
        &input.due_date,
        input.proof_reference.as_deref(),
        input.justification.as_deref(),
    )?;

    tracing::info!(
        address = %ctx.address,
        commitment_id = %verification.commitment_id,
        due_date = %verification.due_date,
        "Verification recorded"
    );

    Ok(format!(
        "Verification recorded for {} (status: {}).",
        verification.due_date, verification.status
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewCommitment, Schedule, StakeType};
    use crate::tools::testing::test_context;

    fn active_commitment(db: &Database, address: &str) -> String {
        let (account, _) = db.get_or_create_account(address).unwrap();
        db.set_account_name(address, "Alex").unwrap();
        db.create_commitment(
            &account.id,
            &NewCommitment {
                goal_description: "Read daily".to_string(),
                task_description: None,
                start_date: "2024-01-01".to_string(),
                end_date: "2024-03-01".to_string(),
                stake_amount: 20.0,
                stake_type: StakeType::PerMissedPeriod,
                schedule: Schedule::Daily,
                verification_method: Some("photo of the page".to_string()),
            },
        )
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_verification_recorded_on_time() {
        let db = Database::open_in_memory().unwrap();
        let (ctx, _) = test_context(db.clone(), "whatsapp:+15550300001");
        let commitment_id = active_commitment(&db, "whatsapp:+15550300001");

        let out = CreateVerificationTool
            .run(
                json!({
                    "commitment_id": commitment_id,
                    "due_date": "2024-01-05",
                    "proof_reference": "https://proofs.example/a.jpg"
                }),
                &ctx,
            )
            .await;

        assert!(out.success, "{}", out.output);
        assert!(out.output.contains("completed_on_time"));
    }

    #[tokio::test]
    async fn test_unknown_commitment_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let (ctx, _) = test_context(db, "whatsapp:+15550300002");

        let out = CreateVerificationTool
            .run(
                json!({"commitment_id": "missing", "due_date": "2024-01-05"}),
                &ctx,
            )
            .await;

        assert!(!out.success);
        assert!(out.output.contains("Not found"));
    }

    #[tokio::test]
    async fn test_malformed_due_date_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (ctx, _) = test_context(db.clone(), "whatsapp:+15550300003");
        let commitment_id = active_commitment(&db, "whatsapp:+15550300003");

        let out = CreateVerificationTool
            .run(
                json!({"commitment_id": commitment_id, "due_date": "yesterday"}),
                &ctx,
            )
            .await;

        assert!(!out.success);
        assert!(out.output.contains("ISO calendar date"));
    }
}
