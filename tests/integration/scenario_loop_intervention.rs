//! Scenario 4 (§8): repeating the identical tool call past
//! `mental_loop_threshold` intercepts the call with an intervention message
//! instead of executing it again, and the run still completes.

mod common;

use overmind::config::AgentLoopConfig;

#[tokio::test]
async fn repeating_the_same_call_triggers_intervention_then_completes() {
    let log = common::CallLog::new();
    let tools = common::tool_surface(vec![std::sync::Arc::new(common::RecordingTool::new("read", log.clone(), "read ok"))]);

    let repeated_call = || vec![common::function_call("1", "read", serde_json::json!({"path": "x"}))];
    let llm = common::mock_llm(vec![
        ("", repeated_call()),
        ("", repeated_call()),
        ("", repeated_call()),
        ("", repeated_call()),
        ("done after reconsidering my approach", vec![]),
    ]);

    let config = AgentLoopConfig { mental_loop_threshold: 3, ..AgentLoopConfig::default() };
    let agent_loop = common::agent_loop(llm, tools, config);
    let (mut ctx, _cancel_tx) = common::loop_ctx();
    let mut agent = overmind::domain::agent::Agent::new("general");

    let result = agent_loop.run(&mut ctx, &mut agent, "keep reading the same file").await;

    assert!(result.is_success());
    // The 4th identical call (count > threshold of 3) is intercepted before
    // it reaches the tool, so only 3 actual executions are recorded.
    assert_eq!(log.entries().len(), 3);

    let intervened = agent.history.iter().any(|turn| {
        turn.parts.iter().any(|part| matches!(part, overmind::domain::agent::TurnPart::ToolResponse { content, success: false, .. } if content.contains("repeated the call")))
    });
    assert!(intervened, "history should contain the mental-loop intervention response");
}
