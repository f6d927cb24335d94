//! Shared fixtures for the end-to-end scenario tests (§8): a scriptable
//! tool that records call order/arguments and can be told to fail a fixed
//! number of times, plus the `AgentLoop`/`AgentLoopContext` builders the
//! crate's own unit tests use, reused here across process boundaries via
//! `overmind`'s `test-util` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use overmind::agent_loop::{AgentLoop, AgentLoopContext, AgentLoopDeps};
use overmind::config::AgentLoopConfig;
use overmind::llm::mock::MockLlmClient;
use overmind::llm::{FunctionCall, LlmClient};
use overmind::reflector::{NullFilePredictor, Reflector};
use overmind::tools::{Tool, ToolContext, ToolResult, ToolSurface};

/// Call order/arguments recorded by every [`RecordingTool`] sharing a log.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// A tool that always succeeds, logging its name to a shared [`CallLog`].
pub struct RecordingTool {
    name: String,
    log: Arc<CallLog>,
    output: String,
}

impl RecordingTool {
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<CallLog>, output: impl Into<String>) -> Self {
        Self { name: name.into(), log, output: output.into() }
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Value {
        serde_json::json!({})
    }

    fn validate(&self, _args: &Value) -> Option<String> {
        None
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        self.log.record(format!("{}:{args}", self.name));
        ToolResult::ok(self.output.clone())
    }
}

/// A tool that fails its first `fail_first` calls with `error_text`, then
/// succeeds, logging every attempt.
pub struct FlakyRecordingTool {
    name: String,
    log: Arc<CallLog>,
    error_text: String,
    attempts: AtomicUsize,
    fail_first: usize,
}

impl FlakyRecordingTool {
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<CallLog>, error_text: impl Into<String>, fail_first: usize) -> Self {
        Self {
            name: name.into(),
            log,
            error_text: error_text.into(),
            attempts: AtomicUsize::new(0),
            fail_first,
        }
    }
}

#[async_trait]
impl Tool for FlakyRecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Value {
        serde_json::json!({})
    }

    fn validate(&self, _args: &Value) -> Option<String> {
        None
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("{}:{args}", self.name));
        if attempt < self.fail_first {
            ToolResult::err(self.error_text.clone())
        } else {
            ToolResult::ok("recovered")
        }
    }
}

#[must_use]
pub fn tool_surface(tools: Vec<Arc<dyn Tool>>) -> ToolSurface {
    let mut registry = overmind::tools::ToolRegistry::new();
    let names: Vec<String> = tools.iter().map(|t| t.name().to_string()).collect();
    for tool in tools {
        registry.register(tool);
    }
    registry.surface(names)
}

#[must_use]
pub fn mock_llm(responses: Vec<(&str, Vec<FunctionCall>)>) -> Arc<dyn LlmClient> {
    Arc::new(MockLlmClient::new(responses))
}

#[must_use]
pub fn function_call(id: &str, name: &str, args: Value) -> FunctionCall {
    FunctionCall { id: id.to_string(), name: name.to_string(), args }
}

#[must_use]
pub fn agent_loop(llm: Arc<dyn LlmClient>, tools: ToolSurface, config: AgentLoopConfig) -> AgentLoop {
    AgentLoop::new(
        config,
        AgentLoopDeps {
            llm,
            tools,
            reflector: Some(Arc::new(Reflector::new(None, Arc::new(NullFilePredictor)))),
            delegation: None,
            messenger: None,
            checkpoints: None,
            shared_memory: None,
            tree_planner: None,
        },
    )
}

#[must_use]
pub fn loop_ctx() -> (AgentLoopContext, CancellationToken) {
    let cancel = CancellationToken::new();
    (
        AgentLoopContext {
            agent_type: "general".to_string(),
            system_prompt: "You are a helpful coding agent.".to_string(),
            plan: None,
            cancel: cancel.clone(),
            delegation_depth: 0,
            active_agents: 1,
        },
        cancel,
    )
}
