//! Scenario 5 (§8): a failed tool-call node reflects to an alternative
//! tool, the planner replans around it up to the configured cap, and the
//! best path is recomputed each time.

use std::sync::Arc;

use overmind::config::TreePlannerConfig;
use overmind::domain::plan::{PlanNode, PlanTree, PlannedAction};
use overmind::reflector::{NullFilePredictor, ReflectionCategory, Reflector};
use overmind::tree_planner::TreePlanner;

fn three_step_tree() -> (PlanTree, uuid::Uuid) {
    let root = PlanNode::root(PlannedAction::verify("ship the fix"));
    let mut tree = PlanTree::new(root, "ship the fix", 100);
    let root_id = tree.root_id;

    let read = PlanNode::child_of(tree.root(), PlannedAction::tool_call("read", serde_json::json!({"path": "src/lib.rs"}), "read"));
    tree.insert_child(root_id, read).unwrap();

    let edit = PlanNode::child_of(tree.root(), PlannedAction::tool_call("edit", serde_json::json!({"path": "src/lib.rs"}), "edit"));
    let edit_id = tree.insert_child(root_id, edit).unwrap();

    let bash = PlanNode::child_of(tree.root(), PlannedAction::tool_call("bash", serde_json::json!({"command": "cargo test"}), "verify"));
    tree.insert_child(root_id, bash).unwrap();

    tree.node_index.get_mut(&root_id).unwrap().status = overmind::domain::plan::PlanNodeStatus::Succeeded;
    (tree, edit_id)
}

#[tokio::test]
async fn compilation_failure_reflects_to_explore_and_replans() {
    let reflector = Reflector::new(None, Arc::new(NullFilePredictor));
    let reflection = reflector
        .reflect("edit", &serde_json::json!({}), "compilation failed: mismatched types")
        .await;
    assert_eq!(reflection.category, ReflectionCategory::CompilationError);
    assert_eq!(reflection.alternative_tool.as_deref(), Some("explore"));

    let (mut tree, edit_id) = three_step_tree();
    let planner = TreePlanner::new(TreePlannerConfig::default());

    planner
        .record_result(
            &mut tree,
            edit_id,
            false,
            Some("compilation failed: mismatched types".to_string()),
            None,
            reflection.alternative_tool.as_deref(),
            true,
        )
        .unwrap();

    assert_eq!(tree.replan_count, 1);
    assert_eq!(tree.node_index[&edit_id].status, overmind::domain::plan::PlanNodeStatus::Failed);

    let parent = tree.node_index[&edit_id].parent_id.unwrap();
    let explore_child = tree.node_index[&parent]
        .children
        .iter()
        .filter_map(|id| tree.node_index.get(id))
        .find(|node| node.action.agent_type.as_deref() == Some("explore") && node.id != edit_id);
    assert!(explore_child.is_some(), "replan should insert an explore-typed alternative");
    assert!(explore_child.unwrap().score > 0.0);
    assert!(!tree.best_path.is_empty());
}

#[tokio::test]
async fn replans_are_capped_and_the_next_attempt_errors() {
    let (mut tree, edit_id) = three_step_tree();
    let planner = TreePlanner::new(TreePlannerConfig::default());

    for _ in 0..3 {
        planner
            .record_result(&mut tree, edit_id, false, Some("compilation failed".to_string()), None, Some("explore"), true)
            .unwrap();
    }
    assert_eq!(tree.replan_count, 3);

    let fourth = planner.record_result(&mut tree, edit_id, false, Some("compilation failed".to_string()), None, Some("explore"), true);
    assert!(fourth.is_err());
}
