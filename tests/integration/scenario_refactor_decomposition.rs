//! Scenario 2 (§8): "refactor auth and update tests" decomposes as the
//! four-stage sequential refactor recipe (not an "X and Y" parallel split),
//! and executing it reports all four subtasks succeeding.

mod common;

use async_trait::async_trait;

use overmind::router::decomposition::{execute_decomposition, fallback_decompose, SubtaskExecutor, SubtaskSpec};

struct AlwaysSucceeds;

#[async_trait]
impl SubtaskExecutor for AlwaysSucceeds {
    async fn execute(&self, subtask: &SubtaskSpec) -> Result<String, String> {
        Ok(format!("completed {}", subtask.id))
    }
}

#[test]
fn refactor_and_update_tests_is_the_sequential_recipe() {
    let plan = fallback_decompose("refactor auth and update tests");

    assert!(!plan.can_parallel);
    let agent_types: Vec<&str> = plan.subtasks.iter().map(|s| s.agent_type.as_str()).collect();
    assert_eq!(agent_types, vec!["explore", "plan", "general", "bash"]);
}

#[tokio::test]
async fn executing_the_recipe_reports_all_four_succeeding() {
    let plan = fallback_decompose("refactor auth and update tests");
    let report = execute_decomposition(&plan, &AlwaysSucceeds, 5).await;

    assert_eq!(report.summary(), "4 succeeded, 0 failed out of 4 subtasks");
}
