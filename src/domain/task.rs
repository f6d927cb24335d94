//! Task and `CoordinatedTask` data model.
//!
//! The state-machine methods (`valid_transitions`, `can_transition_to`,
//! `transition_to`, `force_status`) follow the teacher's
//! `Task::transition_to`/`force_status` quartet: validated transitions are
//! the normal path, `force_status` is an explicit escape hatch for recovery
//! scenarios and always logs a warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentResult;

/// Relative scheduling priority. Weighted `High=10, Normal=5, Low=1` by the
/// coordinator's priority queue (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    /// Weight used by the coordinator's max-heap ordering.
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Self::High => 10,
            Self::Normal => 5,
            Self::Low => 1,
        }
    }
}

/// A unit of work as it enters the system: `{prompt, agentType, priority,
/// maxTurns, model?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub prompt: String,
    pub agent_type: String,
    pub priority: TaskPriority,
    pub max_turns: u32,
    pub model: Option<String>,
}

impl Task {
    #[must_use]
    pub fn new(prompt: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent_type: agent_type.into(),
            priority: TaskPriority::default(),
            max_turns: 25,
            model: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// `Task` is valid iff the prompt and agent type are non-blank.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("task prompt cannot be empty".to_string());
        }
        if self.agent_type.trim().is_empty() {
            return Err("task agent_type cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Lifecycle status of a [`CoordinatedTask`].
///
/// Transitions: `Pending → {Blocked | Ready} → Running → {Completed |
/// Failed}`. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Ready,
    Running,
    Completed,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Statically known valid destinations from this status. Returns a
    /// borrowed slice, not an allocation, mirroring the teacher's
    /// `Task::valid_transitions`.
    #[must_use]
    pub const fn valid_transitions(self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[TaskStatus::Blocked, TaskStatus::Ready],
            Self::Blocked => &[TaskStatus::Ready],
            Self::Ready => &[TaskStatus::Running, TaskStatus::Blocked],
            Self::Running => &[TaskStatus::Completed, TaskStatus::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, target: TaskStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A [`Task`] plus coordinator bookkeeping: id, dependency ids, status, and
/// eventual result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatedTask {
    pub id: Uuid,
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub status: TaskStatus,
    pub result: Option<AgentResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoordinatedTask {
    #[must_use]
    pub fn new(task: Task, dependencies: Vec<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task,
            dependencies,
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A task depending on itself is rejected at construction time rather
    /// than discovered later as a one-node cycle.
    pub fn validate(&self) -> Result<(), String> {
        self.task.validate()?;
        if self.dependencies.contains(&self.id) {
            return Err(format!("task {} cannot depend on itself", self.id));
        }
        Ok(())
    }

    /// Attempt a validated state transition, updating `updated_at` on
    /// success.
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "invalid transition for task {}: {:?} -> {:?}",
                self.id, self.status, target
            ));
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Bypass the state machine entirely. Reserved for coordinator-driven
    /// cancellation and crash-recovery reconciliation; always logs a
    /// warning, mirroring the teacher's `Task::force_status`.
    pub fn force_status(&mut self, target: TaskStatus, reason: &str) {
        tracing::warn!(
            task_id = %self.id,
            from = ?self.status,
            to = ?target,
            reason,
            "forcing coordinated-task status transition (bypassing state machine)"
        );
        self.status = target;
        self.updated_at = Utc::now();
    }

    /// Ready iff every dependency is `Completed`. A `Failed` dependency
    /// blocks forever (per §5 ordering guarantees) rather than counting as
    /// satisfied.
    #[must_use]
    pub fn is_ready(&self, completed: &std::collections::HashSet<Uuid>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentStatus;

    fn sample_task() -> Task {
        Task::new("do the thing", "general")
    }

    #[test]
    fn task_validate_rejects_empty_prompt() {
        let task = Task::new("   ", "general");
        assert!(task.validate().is_err());
    }

    #[test]
    fn task_priority_weights_match_spec() {
        assert_eq!(TaskPriority::High.weight(), 10);
        assert_eq!(TaskPriority::Normal.weight(), 5);
        assert_eq!(TaskPriority::Low.weight(), 1);
    }

    #[test]
    fn coordinated_task_rejects_self_dependency() {
        let task = sample_task();
        let mut ct = CoordinatedTask::new(task, vec![]);
        ct.dependencies.push(ct.id);
        assert!(ct.validate().is_err());
    }

    #[test]
    fn happy_path_transitions() {
        let mut ct = CoordinatedTask::new(sample_task(), vec![]);
        assert_eq!(ct.status, TaskStatus::Pending);
        ct.transition_to(TaskStatus::Ready).unwrap();
        ct.transition_to(TaskStatus::Running).unwrap();
        ct.transition_to(TaskStatus::Completed).unwrap();
        assert!(ct.status.is_terminal());
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut ct = CoordinatedTask::new(sample_task(), vec![]);
        assert!(ct.transition_to(TaskStatus::Completed).is_err());
        assert_eq!(ct.status, TaskStatus::Pending);
    }

    #[test]
    fn terminal_states_reject_all_further_transitions() {
        let mut ct = CoordinatedTask::new(sample_task(), vec![]);
        ct.transition_to(TaskStatus::Ready).unwrap();
        ct.transition_to(TaskStatus::Running).unwrap();
        ct.transition_to(TaskStatus::Failed).unwrap();
        for target in [
            TaskStatus::Pending,
            TaskStatus::Blocked,
            TaskStatus::Ready,
            TaskStatus::Running,
            TaskStatus::Completed,
        ] {
            assert!(ct.transition_to(target).is_err());
        }
    }

    #[test]
    fn force_status_bypasses_state_machine() {
        let mut ct = CoordinatedTask::new(sample_task(), vec![]);
        let before = ct.updated_at;
        ct.force_status(TaskStatus::Failed, "cancelled by coordinator");
        assert_eq!(ct.status, TaskStatus::Failed);
        assert!(ct.updated_at >= before);
    }

    #[test]
    fn is_ready_requires_all_dependencies_completed() {
        let dep_a = Uuid::new_v4();
        let dep_b = Uuid::new_v4();
        let ct = CoordinatedTask::new(sample_task(), vec![dep_a, dep_b]);
        let mut completed = std::collections::HashSet::new();
        assert!(!ct.is_ready(&completed));
        completed.insert(dep_a);
        assert!(!ct.is_ready(&completed));
        completed.insert(dep_b);
        assert!(ct.is_ready(&completed));
    }

    #[test]
    fn is_ready_with_no_dependencies_is_always_ready() {
        let ct = CoordinatedTask::new(sample_task(), vec![]);
        assert!(ct.is_ready(&std::collections::HashSet::new()));
    }

    #[test]
    fn agent_result_success_requires_completed_status_and_no_error() {
        let result = AgentResult {
            agent_id: Uuid::new_v4(),
            agent_type: "general".to_string(),
            status: AgentStatus::Completed,
            output: "done".to_string(),
            error: None,
            duration_ms: 10,
            completed: true,
        };
        assert!(result.is_success());
    }
}
