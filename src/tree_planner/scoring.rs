//! Scoring function and the fixed cost/progress prior tables (§4.7).
//!
//! Grounded on `priority_calculator.rs`'s "small struct of named weights +
//! `calculate()` + defensively clamped arithmetic" idiom: [`ScoreWeights`]
//! is renormalized to sum to 1 the same way the teacher's deadline-boost
//! weights are clamped before use, and every public function here returns
//! a value already clipped to its valid range rather than trusting callers.

use crate::domain::plan::{PlannedAction, PlannedActionType};

/// `score = wSP·successProb + wC·(1 − costEstimate) + wP·goalProgress −
/// 0.02·depth`, clipped to `[0, 1]`. Constructed already renormalized so
/// `w_success_prob + w_cost + w_progress == 1.0`.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub w_success_prob: f64,
    pub w_cost: f64,
    pub w_progress: f64,
    pub depth_penalty: f64,
}

impl ScoreWeights {
    #[must_use]
    pub fn new(w_success_prob: f64, w_cost: f64, w_progress: f64, depth_penalty: f64) -> Self {
        let sum = w_success_prob + w_cost + w_progress;
        let sum = if sum.abs() < f64::EPSILON { 1.0 } else { sum };
        Self {
            w_success_prob: w_success_prob / sum,
            w_cost: w_cost / sum,
            w_progress: w_progress / sum,
            depth_penalty,
        }
    }

    #[must_use]
    pub fn score(&self, success_prob: f64, cost_estimate: f64, goal_progress: f64, depth: u32) -> f64 {
        let raw = self.w_success_prob * success_prob
            + self.w_cost * (1.0 - cost_estimate)
            + self.w_progress * goal_progress
            - self.depth_penalty * f64::from(depth);
        raw.clamp(0.0, 1.0)
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::new(0.4, 0.3, 0.3, 0.02)
    }
}

/// Fixed per-tool cost prior: cheap reads, moderate mutation, expensive
/// network tools. Unknown tools default to a moderate `0.5`.
#[must_use]
pub fn tool_cost_prior(tool_name: &str) -> f64 {
    match tool_name {
        "read" | "glob" | "grep" => 0.1,
        "bash" | "edit" | "write" => 0.4,
        name if name.starts_with("web_") => 0.8,
        _ => 0.5,
    }
}

/// Fixed per-agent-type progress prior reflecting how far into a task's
/// lifecycle that agent type typically operates.
#[must_use]
pub fn agent_type_progress_prior(agent_type: &str) -> f64 {
    match agent_type {
        "explore" | "plan" => 0.2,
        "general" => 0.6,
        "bash" | "verify" => 0.8,
        _ => 0.4,
    }
}

/// Seed a fresh node's `(success_prob, cost_estimate, goal_progress)` prior
/// triple from the fixed tables, dispatching on the action's shape.
#[must_use]
pub fn seed_priors(action: &PlannedAction) -> (f64, f64, f64) {
    match action.action_type {
        PlannedActionType::ToolCall => {
            let tool = action.tool_name.as_deref().unwrap_or("");
            (0.7, tool_cost_prior(tool), 0.3)
        }
        PlannedActionType::Delegate => {
            let agent_type = action.agent_type.as_deref().unwrap_or("general");
            (0.6, 0.5, agent_type_progress_prior(agent_type))
        }
        PlannedActionType::Verify => (0.6, 0.3, 0.9),
        PlannedActionType::Decompose => (0.5, 0.6, 0.1),
    }
}
