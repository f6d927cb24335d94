//! Agent state: history, scratchpad, and lifecycle status.
//!
//! The turn/part split and the fingerprint-counted `callHistory` map are
//! owned exclusively by the agent's own [`crate::agent_loop::AgentLoop`];
//! everything else takes a read lock and copies, per the single-owner
//! shared-resource policy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who emitted a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Model,
}

/// One piece of a turn's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnPart {
    Text { text: String },
    ToolCall { id: String, name: String, args: serde_json::Value },
    ToolResponse { id: String, name: String, content: String, success: bool },
}

/// A single (role, parts) exchange in an agent's history.
///
/// Invariant: a `User` turn whose parts are all `ToolResponse` replies
/// one-to-one, in order, to the most recent `Model` turn's `ToolCall` parts
/// (same ids).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
}

impl Turn {
    #[must_use]
    pub fn text(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![TurnPart::Text { text: text.into() }],
        }
    }

    /// Tool-call ids present in this turn, in order, if this is a `Model`
    /// turn that requested tools.
    #[must_use]
    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                TurnPart::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Lifecycle status of a running or finished agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    const fn valid_transitions(self) -> &'static [AgentStatus] {
        match self {
            Self::Idle => &[AgentStatus::Running],
            Self::Running => &[
                AgentStatus::Completed,
                AgentStatus::Failed,
                AgentStatus::Cancelled,
            ],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, target: AgentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Final outcome of a single agent run: `{agentId, type, status, output,
/// error?, duration, completed}`. Success iff `status == Completed` and
/// `error` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: Uuid,
    pub agent_type: String,
    pub status: AgentStatus,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub completed: bool,
}

impl AgentResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed && self.error.is_none()
    }
}

/// A running sub-agent's mutable state.
///
/// Owned exclusively by its driving [`crate::agent_loop::AgentLoop`]; only
/// that loop mutates `history`/`scratchpad`/`call_history`. Destroyed once
/// its `AgentResult` is consumed by the caller (Router or Coordinator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub agent_type: String,
    pub status: AgentStatus,
    pub history: Vec<Turn>,
    pub scratchpad: String,
    pub pinned_context: Vec<String>,
    pub call_history: HashMap<String, u32>,
    pub tools_used: Vec<String>,
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    #[must_use]
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            status: AgentStatus::Idle,
            history: Vec::new(),
            scratchpad: String::new(),
            pinned_context: Vec::new(),
            call_history: HashMap::new(),
            tools_used: Vec::new(),
            turn_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Attempt a validated status transition.
    pub fn transition_to(&mut self, target: AgentStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "invalid agent status transition: {:?} -> {:?}",
                self.status, target
            ));
        }
        self.status = target;
        Ok(())
    }

    /// Append a turn, enforcing that history never exceeds `max_history`.
    /// Callers are expected to compact (see
    /// [`crate::agent_loop::history::compact`]) before this would overflow;
    /// this is the hard backstop.
    pub fn push_turn(&mut self, turn: Turn, max_history: usize) {
        self.history.push(turn);
        debug_assert!(
            self.history.len() <= max_history + 1,
            "history grew past the hard cap without compaction running first"
        );
    }

    /// Record a `(toolName, args)` fingerprint occurrence, returning the new
    /// count. Used by the mental-loop detector (§4.6 step 6a).
    pub fn record_fingerprint(&mut self, fingerprint: &str) -> u32 {
        let count = self.call_history.entry(fingerprint.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Clear one fingerprint's counter, e.g. after issuing an intervention.
    pub fn clear_fingerprint(&mut self, fingerprint: &str) {
        self.call_history.remove(fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_agent_starts_idle_with_empty_history() {
        let agent = Agent::new("general");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.history.is_empty());
    }

    #[test]
    fn status_transitions_follow_state_machine() {
        let mut agent = Agent::new("general");
        agent.transition_to(AgentStatus::Running).unwrap();
        agent.transition_to(AgentStatus::Completed).unwrap();
        assert!(agent.status.is_terminal());
    }

    #[test]
    fn invalid_status_transition_rejected() {
        let mut agent = Agent::new("general");
        assert!(agent.transition_to(AgentStatus::Completed).is_err());
    }

    #[test]
    fn fingerprint_counting_increments_and_clears() {
        let mut agent = Agent::new("general");
        assert_eq!(agent.record_fingerprint("read:{}"), 1);
        assert_eq!(agent.record_fingerprint("read:{}"), 2);
        agent.clear_fingerprint("read:{}");
        assert_eq!(agent.record_fingerprint("read:{}"), 1);
    }

    #[test]
    fn turn_tool_call_ids_extracts_in_order() {
        let turn = Turn {
            role: TurnRole::Model,
            parts: vec![
                TurnPart::Text { text: "thinking".into() },
                TurnPart::ToolCall {
                    id: "1".into(),
                    name: "read".into(),
                    args: serde_json::json!({"path": "x"}),
                },
                TurnPart::ToolCall {
                    id: "2".into(),
                    name: "grep".into(),
                    args: serde_json::json!({"pattern": "y"}),
                },
            ],
        };
        assert_eq!(turn.tool_call_ids(), vec!["1", "2"]);
    }
}
