//! Property tests for the stage tool binding and thread derivation

use super::ToolRegistry;
use crate::db::derive_thread_id;
use crate::stage::Stage;
use proptest::prelude::*;

const ALL_TOOLS: &[&str] = &[
    "get_account_status",
    "update_account_name",
    "send_message",
    "create_commitment",
    "get_active_commitment",
    "create_verification",
    "request_proof_flow",
];

fn legal_tools(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::NewUser => &["get_account_status", "send_message", "update_account_name"],
        Stage::UserExistsNoGoal => &["get_account_status", "send_message", "create_commitment"],
        Stage::UserExistsActiveGoal => &[
            "get_account_status",
            "send_message",
            "get_active_commitment",
            "create_verification",
            "request_proof_flow",
        ],
    }
}

fn any_stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::NewUser),
        Just(Stage::UserExistsNoGoal),
        Just(Stage::UserExistsActiveGoal),
    ]
}

proptest! {
    /// Arbitrary requested names never resolve outside the stage's subset.
    #[test]
    fn fuzzed_tool_names_respect_the_stage_subset(
        stage in any_stage(),
        name in "[a-z_]{0,30}",
    ) {
        let registry = ToolRegistry::for_stage(stage);
        let legal = legal_tools(stage).contains(&name.as_str());
        prop_assert_eq!(registry.contains(&name), legal);
    }

    /// Every known tool is exposed in exactly the stages that permit it.
    #[test]
    fn known_tools_bind_to_their_stages(stage in any_stage()) {
        let registry = ToolRegistry::for_stage(stage);
        for &name in ALL_TOOLS {
            prop_assert_eq!(
                registry.contains(name),
                legal_tools(stage).contains(&name),
                "tool {} in stage {}", name, stage
            );
        }
    }

    /// Thread derivation is stable and injective over addresses.
    #[test]
    fn thread_ids_are_stable_and_injective(a in "\\PC{1,40}", b in "\\PC{1,40}") {
        prop_assert_eq!(derive_thread_id(&a), derive_thread_id(&a));
        if a != b {
            prop_assert_ne!(derive_thread_id(&a), derive_thread_id(&b));
        }
    }
}

#[cfg(test)]
mod executor_rejection {
    use super::*;
    use crate::db::Database;
    use crate::tools::testing::test_context;

    /// An out-of-stage tool name is unknown to the executor: no side
    /// effect, no output, `None`.
    #[tokio::test]
    async fn test_illegal_tool_does_not_execute() {
        let db = Database::open_in_memory().unwrap();
        let (ctx, delivery) = test_context(db.clone(), "whatsapp:+15550500001");
        db.get_or_create_account("whatsapp:+15550500001").unwrap();

        let registry = ToolRegistry::for_stage(Stage::NewUser);
        let result = registry
            .execute("create_commitment", serde_json::json!({}), &ctx)
            .await;

        assert!(result.is_none());
        assert!(delivery.sent().is_empty());
    }
}
