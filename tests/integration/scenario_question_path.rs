//! Scenario 1 (§8): a question-shaped instruction routes `Direct` with the
//! minimal tool surface, and runs end to end through the agent loop with a
//! plain-text (no function calls) model response.

mod common;

use overmind::config::{AgentLoopConfig, RouterConfig};
use overmind::router::{Router, Strategy, TaskClass};

#[tokio::test]
async fn question_prompt_routes_direct_with_core_surface() {
    let router = Router::new(RouterConfig::default());
    let decision = router.route("what does this code do?", false, 0.0, false).await;

    assert_eq!(decision.class, TaskClass::Question);
    assert_eq!(decision.strategy, Strategy::Direct);
    assert_eq!(decision.score, 1);
    assert_eq!(decision.tool_surface, vec!["core".to_string()]);
}

#[tokio::test]
async fn question_prompt_completes_without_any_tool_calls() {
    let llm = common::mock_llm(vec![("This module wires the nine orchestration components together.", vec![])]);
    let tools = common::tool_surface(vec![]);
    let agent_loop = common::agent_loop(llm, tools, AgentLoopConfig::default());
    let (mut ctx, _cancel_tx) = common::loop_ctx();

    let mut agent = overmind::domain::agent::Agent::new("general");
    let result = agent_loop.run(&mut ctx, &mut agent, "what does this code do?").await;

    assert!(result.is_success());
    assert!(!result.output.is_empty());
}
