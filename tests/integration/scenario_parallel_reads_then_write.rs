//! Scenario 3 (§8): two read-only calls (`read`, `grep`) batch into one
//! parallel group ahead of a trailing write (`write`), which stays its own
//! sequential group; running the loop executes them in submission order.

mod common;

use overmind::config::AgentLoopConfig;
use overmind::tools::{classify, optimize, GroupMode, ToolCall};

fn call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall { id: uuid::Uuid::new_v4().to_string(), name: name.to_string(), args }
}

#[test]
fn classify_batches_reads_ahead_of_the_trailing_write() {
    let calls = vec![
        call("read", serde_json::json!({"path": "A"})),
        call("grep", serde_json::json!({"pattern": "B"})),
        call("write", serde_json::json!({"path": "C"})),
    ];
    let ordered = optimize(&calls);
    let groups = classify(&ordered);

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].mode, GroupMode::Parallel);
    assert_eq!(groups[0].calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["read", "grep"]);
    assert_eq!(groups[1].mode, GroupMode::Sequential);
    assert_eq!(groups[1].calls[0].name, "write");
}

#[tokio::test]
async fn running_the_loop_executes_reads_then_the_write_in_order() {
    let log = common::CallLog::new();
    let tools = common::tool_surface(vec![
        std::sync::Arc::new(common::RecordingTool::new("read", log.clone(), "read ok")),
        std::sync::Arc::new(common::RecordingTool::new("grep", log.clone(), "grep ok")),
        std::sync::Arc::new(common::RecordingTool::new("write", log.clone(), "write ok")),
    ]);

    let calls = vec![
        common::function_call("1", "read", serde_json::json!({"path": "A"})),
        common::function_call("2", "grep", serde_json::json!({"pattern": "B"})),
        common::function_call("3", "write", serde_json::json!({"path": "C", "content": "x"})),
    ];
    let llm = common::mock_llm(vec![
        ("", calls),
        ("done updating the three files", vec![]),
    ]);

    let agent_loop = common::agent_loop(llm, tools, AgentLoopConfig::default());
    let (mut ctx, _cancel_tx) = common::loop_ctx();
    let mut agent = overmind::domain::agent::Agent::new("general");

    let result = agent_loop.run(&mut ctx, &mut agent, "read A and B then write C").await;

    assert!(result.is_success());
    let entries = log.entries();
    assert!(entries[0].starts_with("read:"));
    assert!(entries[1].starts_with("grep:"));
    assert!(entries[2].starts_with("write:"));
}
