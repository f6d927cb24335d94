//! Scenario 6 (§8): a completed run's unconditional final checkpoint round
//! trips through a real [`CheckpointStore`] on disk.

mod common;

use std::sync::Arc;

use overmind::agent_loop::{AgentCheckpoint, AgentLoop, AgentLoopDeps};
use overmind::config::AgentLoopConfig;
use overmind::reflector::{NullFilePredictor, Reflector};
use overmind::stores::checkpoint::CheckpointStore;

#[tokio::test]
async fn run_completion_checkpoints_and_the_checkpoint_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CheckpointStore::new(dir.path(), 20));

    let log = common::CallLog::new();
    let tools = common::tool_surface(vec![std::sync::Arc::new(common::RecordingTool::new("read", log.clone(), "read ok"))]);
    let llm = common::mock_llm(vec![
        ("", vec![common::function_call("1", "read", serde_json::json!({"path": "x"}))]),
        ("all done", vec![]),
    ]);

    let agent_loop = AgentLoop::new(
        AgentLoopConfig::default(),
        AgentLoopDeps {
            llm,
            tools,
            reflector: Some(Arc::new(Reflector::new(None, Arc::new(NullFilePredictor)))),
            delegation: None,
            messenger: None,
            checkpoints: Some(store.clone()),
            shared_memory: None,
            tree_planner: None,
        },
    );

    let (mut ctx, _cancel_tx) = common::loop_ctx();
    let mut agent = overmind::domain::agent::Agent::new("general");
    let result = agent_loop.run(&mut ctx, &mut agent, "read x then summarize").await;

    assert!(result.is_success());
    assert_eq!(agent.turn_count, 2);

    let checkpoint: AgentCheckpoint = store
        .load_latest(agent.id)
        .await
        .unwrap()
        .expect("the unconditional final checkpoint should have been written");

    assert_eq!(checkpoint.turn_number, agent.turn_count);
    assert_eq!(checkpoint.scratchpad, agent.scratchpad);
    assert_eq!(checkpoint.agent_state.history.len(), agent.history.len());

    let (restored, restored_plan) = agent_loop.restore_from_checkpoint(checkpoint).await;
    assert_eq!(restored.turn_count, agent.turn_count);
    assert_eq!(restored.scratchpad, agent.scratchpad);
    assert!(restored_plan.is_none());
}
