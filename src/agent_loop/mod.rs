//! Agent Loop (§4.6): drives one agent's turn-by-turn model/tool
//! conversation to completion, cancellation, or the turn limit.
//!
//! Grounded on the teacher's `application::{agent_executor, loop_executor}`
//! pair: `AgentExecutor::execute_with_retry`'s attempt-counter/exponential-
//! backoff shape (generalized here from `ClaudeError` to the Reflector's
//! retryable [`crate::reflector::ReflectionCategory`] set) and
//! `LoopExecutor::run_loop`'s per-iteration `select!` against a shutdown
//! channel, periodic checkpointing, and safety-limit/convergence checks.
//! Cancellation follows the teacher's `services::swarm_orchestrator::
//! convergent_execution` module: a `CancellationToken` threaded through
//! every blocking call, rather than a channel each caller has to drain.

pub mod history;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AgentLoopConfig;
use crate::delegation::{DelegationContext, DelegationStrategy, Messenger};
use crate::domain::agent::{Agent, AgentResult, AgentStatus, Turn, TurnPart, TurnRole};
use crate::domain::plan::{PlanTree, PlanTreeSnapshot};
use crate::llm::LlmClient;
use crate::reflector::{is_retryable, Reflector, ReflectorSnapshot};
use crate::shared_memory::{SharedEntry, SharedMemoryBus};
use crate::stores::checkpoint::CheckpointStore;
use crate::tools::{self, ToolContext, ToolResult, ToolSurface};
use crate::tree_planner::TreePlanner;

/// Collaborators an [`AgentLoop`] is built from. Every field but `llm` and
/// `tools` is optional: a bare agent loop with no reflector, delegation, or
/// checkpoint store still runs, just without recovery or persistence.
pub struct AgentLoopDeps {
    pub llm: Arc<dyn LlmClient>,
    pub tools: ToolSurface,
    pub reflector: Option<Arc<Reflector>>,
    pub delegation: Option<Arc<DelegationStrategy>>,
    pub messenger: Option<Arc<dyn Messenger>>,
    pub checkpoints: Option<Arc<CheckpointStore>>,
    pub shared_memory: Option<Arc<SharedMemoryBus>>,
    pub tree_planner: Option<Arc<TreePlanner>>,
}

/// Per-run context: the system prompt, an optional plan this agent is
/// executing against, a cooperative cancellation token, and the active
/// delegation depth/agent count the caller already knows about.
pub struct AgentLoopContext {
    pub agent_type: String,
    pub system_prompt: String,
    pub plan: Option<Arc<tokio::sync::Mutex<PlanTree>>>,
    pub cancel: CancellationToken,
    pub delegation_depth: u32,
    pub active_agents: u32,
}

/// What to send the model on the next turn.
enum NextStep {
    /// A plain user message with no preceding tool calls to respond to
    /// (just the initial prompt, in practice).
    InitialPrompt(String),
    /// Tool-response parts pairing one-to-one with the prior model turn's
    /// tool calls, sent via `send_function_response` so no empty user
    /// message is ever emitted just to carry them.
    FunctionResponse(Vec<TurnPart>),
    /// The model stopped requesting tools; the run is complete.
    Done,
}

/// Why a checkpoint was written (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Auto,
    Manual,
    Error,
}

/// Self-contained run snapshot (§3/§6): the full agent state, an optional
/// shared-memory dump, an optional denormalized plan tree (parent pointers
/// reconstructed from `children` on load), the reflector's snapshot, and
/// the bookkeeping needed to reattach a run in progress. `scratchpad` and
/// `turn_number` duplicate fields already inside `agent_state`, mirroring
/// the checkpoint document's own schema.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentCheckpoint {
    pub agent_state: Agent,
    pub shared_memory: Option<Vec<SharedEntry>>,
    pub plan_tree: Option<PlanTreeSnapshot>,
    pub reflector: Option<ReflectorSnapshot>,
    pub scratchpad: String,
    pub turn_number: u32,
    pub trigger_reason: CheckpointTrigger,
    pub timestamp: chrono::DateTime<Utc>,
}

impl Default for AgentCheckpoint {
    fn default() -> Self {
        Self {
            agent_state: Agent::new("general"),
            shared_memory: None,
            plan_tree: None,
            reflector: None,
            scratchpad: String::new(),
            turn_number: 0,
            trigger_reason: CheckpointTrigger::Auto,
            timestamp: Utc::now(),
        }
    }
}

/// Drives `agent` through turns until the model stops requesting tools, the
/// turn limit is reached, or `ctx.cancel` fires.
pub struct AgentLoop {
    config: AgentLoopConfig,
    deps: AgentLoopDeps,
}

impl AgentLoop {
    #[must_use]
    pub fn new(config: AgentLoopConfig, deps: AgentLoopDeps) -> Self {
        Self { config, deps }
    }

    /// Run `agent` against `prompt` to completion per §4.6's per-turn step
    /// sequence, returning its final [`AgentResult`].
    pub async fn run(&self, ctx: &mut AgentLoopContext, agent: &mut Agent, prompt: &str) -> AgentResult {
        let started = Instant::now();
        agent
            .transition_to(AgentStatus::Running)
            .expect("Idle -> Running is always valid");

        let mut effective_max_turns = self.config.max_turn_limit;
        let mut stuck_count: u32 = 0;
        let mut last_goal_progress: Option<f64> = None;

        let mut next_step = NextStep::InitialPrompt(prompt.to_string());
        let mut last_tool_name: Option<String> = None;
        let mut last_tool_error: Option<String> = None;
        let mut last_tool_args: Option<Value> = None;

        let mut outcome = loop {
            if ctx.cancel.is_cancelled() {
                break self.finish(agent, AgentStatus::Cancelled, None);
            }
            if agent.turn_count >= effective_max_turns {
                break self.finish(
                    agent,
                    AgentStatus::Failed,
                    Some("turn limit reached without completion".to_string()),
                );
            }

            if agent.turn_count > 0 && agent.turn_count % self.config.checkpoint_interval == 0 {
                self.save_checkpoint(agent, ctx.plan.as_ref(), CheckpointTrigger::Auto).await;
            }

            self.compact_if_needed(agent);

            if let Some(plan) = ctx.plan.clone() {
                if self.execute_ready_plan_actions(&plan, agent).await {
                    ctx.plan = None;
                }
            }

            let step = std::mem::replace(&mut next_step, NextStep::Done);
            let (stream, turn_to_push) = match step {
                NextStep::Done => break self.finish(agent, AgentStatus::Completed, None),
                NextStep::InitialPrompt(message) => {
                    let stream = if agent.history.is_empty() {
                        self.deps.llm.send_message(&format!("{}\n\n{message}", ctx.system_prompt)).await
                    } else {
                        self.deps.llm.send_message_with_history(&agent.history, &message).await
                    };
                    (stream, Turn::text(TurnRole::User, message))
                }
                NextStep::FunctionResponse(parts) => {
                    let stream = self.deps.llm.send_function_response(&agent.history, &parts).await;
                    (stream, Turn { role: TurnRole::User, parts })
                }
            };

            let collected = match stream {
                Ok(mut stream) => stream.collect().await,
                Err(e) => Err(e),
            };

            let collected = match collected {
                Ok(c) => c,
                Err(e) => {
                    break self.finish(agent, AgentStatus::Failed, Some(format!("model transport error: {e}")));
                }
            };

            agent.push_turn(turn_to_push, self.config.max_history_size);

            if collected.function_calls.is_empty() {
                agent.push_turn(
                    Turn::text(TurnRole::Model, collected.text.clone()),
                    self.config.max_history_size,
                );
                agent.turn_count += 1;
                next_step = NextStep::Done;
                continue;
            }

            let calls: Vec<tools::ToolCall> = collected
                .function_calls
                .iter()
                .map(|fc| tools::ToolCall {
                    id: fc.id.clone(),
                    name: fc.name.clone(),
                    args: fc.args.clone(),
                })
                .collect();

            let model_parts: Vec<TurnPart> = std::iter::once(TurnPart::Text { text: collected.text.clone() })
                .chain(calls.iter().map(|c| TurnPart::ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    args: c.args.clone(),
                }))
                .collect();
            agent.push_turn(Turn { role: TurnRole::Model, parts: model_parts }, self.config.max_history_size);

            if let Some(intervention) = self.detect_mental_loop(agent, &calls) {
                effective_max_turns += self.config.mental_loop_bonus_turns;
                let response_parts = calls
                    .iter()
                    .map(|c| TurnPart::ToolResponse {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        content: intervention.clone(),
                        success: false,
                    })
                    .collect();
                agent.turn_count += 1;
                next_step = NextStep::FunctionResponse(response_parts);
                continue;
            }

            let ordered = tools::optimize(&calls);
            let groups = tools::classify(&ordered);
            let mut response_parts = Vec::with_capacity(calls.len());
            let mut any_failed = false;

            for group in groups {
                let results = self.execute_group(agent, &group.calls).await;
                for (call, result) in group.calls.iter().zip(results) {
                    if !result.success {
                        any_failed = true;
                        last_tool_name = Some(call.name.clone());
                        last_tool_error = Some(result.content.clone());
                        last_tool_args = Some(call.args.clone());
                    }
                    response_parts.push(TurnPart::ToolResponse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        content: truncate(&result.content, self.config.tool_result_max_chars),
                        success: result.success,
                    });
                }
            }

            if any_failed {
                stuck_count += 1;
                if let Some(delegation_outcome) = self.try_delegate(ctx, agent, &last_tool_name, &last_tool_error, &last_tool_args, stuck_count).await {
                    if let Some(TurnPart::ToolResponse { content, .. }) = response_parts.last_mut() {
                        content.push_str("\n\n");
                        content.push_str(&delegation_outcome);
                    }
                }
            } else {
                stuck_count = 0;
            }

            agent.turn_count += 1;
            next_step = NextStep::FunctionResponse(response_parts);

            if let Some(plan) = &ctx.plan {
                let progress = plan.lock().await.root().goal_progress;
                if last_goal_progress == Some(progress) {
                    stuck_count = stuck_count.max(1);
                }
                last_goal_progress = Some(progress);
            }
        };

        self.save_checkpoint(agent, ctx.plan.as_ref(), CheckpointTrigger::Auto).await;
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    fn finish(&self, agent: &mut Agent, status: AgentStatus, error: Option<String>) -> AgentResult {
        if agent.status.can_transition_to(status) {
            let _ = agent.transition_to(status);
        }
        let output = agent
            .history
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Model)
            .map(|t| {
                t.parts
                    .iter()
                    .filter_map(|p| match p {
                        TurnPart::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        AgentResult {
            agent_id: agent.id,
            agent_type: agent.agent_type.clone(),
            status,
            output,
            error,
            duration_ms: 0,
            completed: status == AgentStatus::Completed,
        }
    }

    /// Persist a full checkpoint document for `agent` (§3/§6): its state,
    /// the shared-memory bus's current contents, its active plan
    /// (denormalized), and the reflector's snapshot, whichever of those
    /// collaborators are attached. No-op if no checkpoint store is
    /// configured. Returns the new checkpoint's id on success.
    pub async fn save_checkpoint(
        &self,
        agent: &Agent,
        plan: Option<&Arc<tokio::sync::Mutex<PlanTree>>>,
        trigger: CheckpointTrigger,
    ) -> Option<String> {
        let store = self.deps.checkpoints.as_ref()?;
        let plan_tree = match plan {
            Some(p) => Some(p.lock().await.to_snapshot()),
            None => None,
        };
        let shared_memory = match &self.deps.shared_memory {
            Some(bus) => Some(bus.snapshot().await),
            None => None,
        };
        let reflector = self.deps.reflector.as_ref().map(|r| r.snapshot());
        let checkpoint = AgentCheckpoint {
            agent_state: agent.clone(),
            shared_memory,
            plan_tree,
            reflector,
            scratchpad: agent.scratchpad.clone(),
            turn_number: agent.turn_count,
            trigger_reason: trigger,
            timestamp: Utc::now(),
        };
        match store.save(agent.id, &checkpoint).await {
            Ok(id) => {
                debug!(agent_id = %agent.id, checkpoint_id = %id, trigger = ?trigger, "saved agent checkpoint");
                Some(id)
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "failed to save agent checkpoint");
                None
            }
        }
    }

    /// Rebuild an [`Agent`] and, if one was active, a reattached plan tree
    /// from a saved [`AgentCheckpoint`] — restoring shared-memory entries
    /// and the reflector's learned-error snapshot along the way. The
    /// returned plan, assigned back onto [`AgentLoopContext::plan`], puts
    /// the run back into planning mode.
    pub async fn restore_from_checkpoint(
        &self,
        checkpoint: AgentCheckpoint,
    ) -> (Agent, Option<Arc<tokio::sync::Mutex<PlanTree>>>) {
        if let (Some(bus), Some(entries)) = (&self.deps.shared_memory, checkpoint.shared_memory) {
            bus.restore(entries).await;
        }
        if let (Some(reflector), Some(snapshot)) = (&self.deps.reflector, checkpoint.reflector) {
            reflector.restore(snapshot);
        }
        let max_nodes = self
            .deps
            .tree_planner
            .as_ref()
            .map_or(crate::config::TreePlannerConfig::default().max_tree_nodes, |p| p.max_tree_nodes());
        let plan = checkpoint
            .plan_tree
            .map(|snapshot| Arc::new(tokio::sync::Mutex::new(snapshot.into_tree(max_nodes))));
        (checkpoint.agent_state, plan)
    }

    /// Soft summarization above the warning ratio, hard force-compaction
    /// above `max_history_size` (§4.6 step 3).
    fn compact_if_needed(&self, agent: &mut Agent) {
        if agent.history.len() > self.config.max_history_size {
            agent.history = history::force_compact(&agent.history, self.config.max_history_size);
            return;
        }
        let estimated = history::estimate_tokens(&agent.history);
        let warning_threshold = (self.config.max_history_size as f64 * self.config.token_warning_ratio) as u64;
        if estimated > warning_threshold {
            let keep_head = 2;
            let keep_tail = ((agent.history.len() as f64) * self.config.summarize_to_ratio) as usize;
            agent.history = history::summarize_middle(&agent.history, keep_head, keep_tail.max(4), |middle| {
                format!("{} characters of earlier tool/model exchange elided", middle.len())
            });
        }
    }

    /// Fingerprint each requested call as `name:canonical_args`; a count
    /// past `mental_loop_threshold` clears the counter and returns an
    /// intervention message instead of executing the calls (§4.6 step 6a).
    fn detect_mental_loop(&self, agent: &mut Agent, calls: &[tools::ToolCall]) -> Option<String> {
        for call in calls {
            let fingerprint = format!("{}:{}", call.name, call.args);
            let count = agent.record_fingerprint(&fingerprint);
            if count > self.config.mental_loop_threshold {
                agent.clear_fingerprint(&fingerprint);
                return Some(format!(
                    "You have repeated the call `{}` with identical arguments {} times. \
                     Stop and try a materially different approach before calling it again.",
                    call.name, count
                ));
            }
        }
        None
    }

    async fn execute_group(&self, agent: &Agent, calls: &[tools::ToolCall]) -> Vec<ToolResult> {
        let cap = self.config.parallel_tool_cap.max(1);
        let mut results = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(cap) {
            let futures = chunk.iter().map(|call| self.execute_one(agent, call));
            results.extend(futures::future::join_all(futures).await);
        }
        results
    }

    async fn execute_one(&self, agent: &Agent, call: &tools::ToolCall) -> ToolResult {
        let Some(tool) = self.deps.tools.get(&call.name) else {
            return ToolResult::err(format!("no such tool: {}", call.name));
        };
        if let Some(message) = tool.validate(&call.args) {
            return ToolResult::err(message);
        }
        let tool_ctx = ToolContext {
            agent_id: Some(agent.id),
            working_dir: None,
        };
        self.retry_with_backoff(&call.name, &call.args, &tool_ctx, tool.as_ref()).await
    }

    /// Generalized from `AgentExecutor::execute_with_retry`: 3 attempts,
    /// exponential 1s/2s/4s backoff, gated on the Reflector's retryable
    /// category set rather than a Claude-specific error type.
    async fn retry_with_backoff(
        &self,
        tool_name: &str,
        args: &Value,
        tool_ctx: &ToolContext,
        tool: &dyn tools::Tool,
    ) -> ToolResult {
        let max_attempts = self.config.tool_retry_max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.tool_retry_initial_backoff_ms);
        let mut last_result = tool.execute(tool_ctx, args.clone()).await;

        for attempt in 1..max_attempts {
            if last_result.success {
                return last_result;
            }
            let retryable = match &self.deps.reflector {
                Some(reflector) => is_retryable(reflector.reflect(tool_name, args, &last_result.content).await.category),
                None => false,
            };
            if !retryable {
                return last_result;
            }
            warn!(
                tool = tool_name,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis(),
                error = %last_result.content,
                "retrying tool call after transient error"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            last_result = tool.execute(tool_ctx, args.clone()).await;
        }
        last_result
    }

    async fn try_delegate(
        &self,
        ctx: &AgentLoopContext,
        agent: &Agent,
        last_tool_name: &Option<String>,
        last_tool_error: &Option<String>,
        last_tool_args: &Option<Value>,
        stuck_count: u32,
    ) -> Option<String> {
        let delegation = self.deps.delegation.as_ref()?;
        let messenger = self.deps.messenger.as_ref()?;
        let reflection = match (last_tool_name, last_tool_error) {
            (Some(name), Some(error)) => {
                let reflector = self.deps.reflector.as_ref()?;
                Some(reflector.reflect(name, last_tool_args.as_ref().unwrap_or(&Value::Null), error).await)
            }
            _ => None,
        };
        let delegation_ctx = DelegationContext {
            agent_type: agent.agent_type.clone(),
            turn: agent.turn_count,
            max_turns: self.config.max_turn_limit,
            last_tool_name: last_tool_name.clone(),
            last_tool_error: last_tool_error.clone(),
            last_tool_args: last_tool_args.clone(),
            reflection,
            stuck_count,
            delegation_depth: ctx.delegation_depth,
        };
        let decision = delegation.decide(&delegation_ctx, self.config.max_turn_limit, ctx.active_agents)?;
        info!(
            agent_id = %agent.id,
            target = %decision.target_type,
            reason = %decision.reason,
            "delegating after repeated tool failure"
        );
        match delegation.execute_delegation(&delegation_ctx, &decision, messenger.as_ref()).await {
            Ok(response) => Some(format!("### Delegation to `{}`\n{response}", decision.target_type)),
            Err(e) => Some(format!("### Delegation to `{}` failed\n{e}", decision.target_type)),
        }
    }

    /// Execute every currently-ready plan action concurrently — one task per
    /// ready node, joined with a barrier — then feed outcomes back into the
    /// tree. This only drives nodes the Tree Planner already placed in the
    /// tree; it never builds one. On the first failure, replan (up to
    /// `maxReplans` attempts, via the attached [`TreePlanner`]); if
    /// replanning is exhausted or not attemptable, returns `true` to signal
    /// the caller to exit planned mode.
    async fn execute_ready_plan_actions(&self, plan: &Arc<tokio::sync::Mutex<PlanTree>>, agent: &Agent) -> bool {
        let ready = {
            let tree = plan.lock().await;
            tree.ready_actions()
        };
        let actions: Vec<_> = {
            let tree = plan.lock().await;
            ready
                .into_iter()
                .filter_map(|node_id| tree.node_index.get(&node_id).map(|n| (node_id, n.action.clone())))
                .collect()
        };

        let outcomes = futures::future::join_all(actions.iter().map(|(node_id, action)| async move {
            let Some(tool_name) = &action.tool_name else {
                return (*node_id, None);
            };
            let result = self
                .execute_one(
                    agent,
                    &tools::ToolCall {
                        id: node_id.to_string(),
                        name: tool_name.clone(),
                        args: action.tool_args.clone().unwrap_or(Value::Null),
                    },
                )
                .await;
            (*node_id, Some(result))
        }))
        .await;

        let mut first_failure: Option<(Uuid, ToolResult)> = None;
        for (node_id, result) in outcomes {
            let Some(result) = result else { continue };
            if !result.success && first_failure.is_none() {
                first_failure = Some((node_id, result));
                continue;
            }
            let mut tree = plan.lock().await;
            tree.record_result(node_id, result.success, Some(result.content), None);
        }

        let Some((node_id, result)) = first_failure else { return false };

        let reflection = match &self.deps.reflector {
            Some(reflector) => Some(reflector.reflect("plan_action", &Value::Null, &result.content).await),
            None => None,
        };
        let alternative = reflection.and_then(|r| r.alternative_tool);

        let mut tree = plan.lock().await;
        match &self.deps.tree_planner {
            Some(planner) => match planner.record_result(&mut tree, node_id, false, Some(result.content), None, alternative.as_deref(), true) {
                Ok(()) => false,
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "plan action failed and could not be replanned; exiting planned mode");
                    true
                }
            },
            None => {
                tree.record_result(node_id, false, Some(result.content), None);
                true
            }
        }
    }
}

fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}\n...[truncated, {} characters omitted]", content.chars().count() - max_chars)
}
