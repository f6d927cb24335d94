//! Delegation Strategy (§4.5): decides whether a running agent should hand
//! off to another agent type, to whom, and with what query.
//!
//! Grounded on the teacher's `services::priority_calculator::PriorityCalculator`
//! idiom: a small struct of named weights, a `calculate()`-shaped entry
//! point, named sub-helpers, and a table-driven test suite with explicit
//! arithmetic-derivation comments.

mod rules;

pub use rules::{built_in_rules, DelegationCondition};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reflector::ReflectionResult;
use crate::ring_buffer::RingBuffer;

/// Maximum hand-off depth; a chain this long refuses further delegation.
pub const MAX_DELEGATION_DEPTH: u32 = 5;

/// Turns of no-progress before an agent is considered stuck.
pub const STUCK_THRESHOLD: u32 = 5;

/// How long a failed `(from, to)` pair is suppressed from being re-selected.
const SUPPRESSION_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Minimum recent-result samples before `recent_trend` trusts the buffer
/// over a neutral `0.0`.
const MIN_SAMPLES_FOR_CONFIDENCE: usize = 5;

/// Everything a delegation decision is made from, snapshotted once per
/// evaluation by the calling agent loop.
#[derive(Debug, Clone)]
pub struct DelegationContext {
    pub agent_type: String,
    pub turn: u32,
    pub max_turns: u32,
    pub last_tool_name: Option<String>,
    pub last_tool_error: Option<String>,
    pub last_tool_args: Option<serde_json::Value>,
    pub reflection: Option<ReflectionResult>,
    pub stuck_count: u32,
    pub delegation_depth: u32,
}

/// One candidate hand-off rule. `condition` is evaluated against a
/// [`DelegationContext`]; `build_query` renders the message sent to the
/// target agent type.
pub struct DelegationRule {
    pub from_type: Option<String>,
    pub target_type: String,
    pub reason: String,
    pub condition: Box<dyn Fn(&DelegationContext) -> bool + Send + Sync>,
    pub build_query: Box<dyn Fn(&DelegationContext) -> String + Send + Sync>,
}

impl DelegationRule {
    fn applies(&self, ctx: &DelegationContext) -> bool {
        match &self.from_type {
            Some(from) if from != &ctx.agent_type => false,
            _ => (self.condition)(ctx),
        }
    }
}

/// The outcome of evaluating the rule set against a context: who to
/// delegate to, why, with what opening message, and at what adapted turn
/// budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationDecision {
    pub target_type: String,
    pub reason: String,
    pub query: String,
    pub adapted_max_turns: u32,
    pub delegation_depth: u32,
    pub score: f64,
}

/// One `(fromAgent, toAgent, contextType) -> stats` row, the persisted
/// shape of the in-memory path-stats table (see [`DelegationStrategy::
/// snapshot_stats`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationPathEntry {
    pub from_type: String,
    pub to_type: String,
    pub context_type: String,
    pub stats: DelegationPathStats,
}

/// Per-(fromAgent, toAgent, contextType) learned outcome history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationPathStats {
    pub success_count: u32,
    pub failure_count: u32,
    /// Most recent outcomes, newest last; capacity 20.
    pub recent: RingBuffer<bool>,
    /// EMA-smoothed rule weight, clamped to `[0.5, 2.0]`, starts at `1.0`.
    pub rule_weight: f64,
}

impl Default for DelegationPathStats {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            recent: RingBuffer::new(20),
            rule_weight: 1.0,
        }
    }
}

impl DelegationPathStats {
    const ALPHA: f64 = 0.1;
    const SUCCESS_TARGET: f64 = 1.2;
    const FAILURE_TARGET: f64 = 0.8;

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            f64::from(self.success_count) / f64::from(total)
        }
    }

    pub fn record(&mut self, success: bool) {
        self.recent.push(success);
        if success {
            self.success_count += 1;
            self.rule_weight += Self::ALPHA * (Self::SUCCESS_TARGET - self.rule_weight);
        } else {
            self.failure_count += 1;
            self.rule_weight += Self::ALPHA * (Self::FAILURE_TARGET - self.rule_weight);
        }
        self.rule_weight = self.rule_weight.clamp(0.5, 2.0);
    }

    /// Second-half success rate minus first-half, in `[-1, 1]`. Returns
    /// `0.0` (no signal) with fewer than [`MIN_SAMPLES_FOR_CONFIDENCE`]
    /// samples.
    #[must_use]
    pub fn recent_trend(&self) -> f64 {
        if self.recent.len() < MIN_SAMPLES_FOR_CONFIDENCE {
            return 0.0;
        }
        let (older, newer) = self.recent.split_halves();
        let rate = |xs: &[&bool]| -> f64 {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().filter(|b| ***b).count() as f64 / xs.len() as f64
            }
        };
        (rate(&newer) - rate(&older)).clamp(-1.0, 1.0)
    }
}

/// Lazily-pruned cooldown on `(fromType, targetType)` pairs, checked (and
/// expired) on lookup rather than via a background sweep, the way the
/// teacher's rate limiter refills lazily instead of ticking.
#[derive(Debug, Default)]
pub struct SuppressionCache {
    suppressed: HashMap<(String, String), Instant>,
}

impl SuppressionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.suppressed.insert((from.into(), to.into()), Instant::now());
    }

    #[must_use]
    pub fn is_suppressed(&mut self, from: &str, to: &str) -> bool {
        let key = (from.to_string(), to.to_string());
        match self.suppressed.get(&key) {
            Some(at) if at.elapsed() < SUPPRESSION_COOLDOWN => true,
            Some(_) => {
                self.suppressed.remove(&key);
                false
            }
            None => false,
        }
    }
}

/// Contract for sending a message to another agent and awaiting its reply.
/// The orchestration core never implements agent-to-agent transport itself;
/// this is the seam a host application fills in.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        kind: &str,
        to_role: &str,
        content: &str,
        data: serde_json::Value,
    ) -> Result<String, String>;

    async fn receive_response(&self, ctx: &DelegationContext, message_id: &str) -> Result<String, String>;
}

/// Owns the rule table, suppression cache, and per-path stats; produces
/// delegation decisions and executes them through a [`Messenger`].
pub struct DelegationStrategy {
    rules: Vec<DelegationRule>,
    suppression: std::sync::Mutex<SuppressionCache>,
    stats: std::sync::Mutex<HashMap<(String, String, String), DelegationPathStats>>,
}

impl DelegationStrategy {
    #[must_use]
    pub fn new(rules: Vec<DelegationRule>) -> Self {
        Self {
            rules,
            suppression: std::sync::Mutex::new(SuppressionCache::new()),
            stats: std::sync::Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_built_in_rules() -> Self {
        Self::new(built_in_rules())
    }

    /// Evaluate the rule table against `ctx`, returning the single best
    /// decision, or `None` if no rule matches, depth is exhausted, or every
    /// match is currently suppressed. `active_agents` feeds the load
    /// penalty; callers pass the coordinator's current running-agent count
    /// (or `0` outside a coordinated run).
    pub fn decide(&self, ctx: &DelegationContext, base_turns: u32, active_agents: u32) -> Option<DelegationDecision> {
        if ctx.delegation_depth >= MAX_DELEGATION_DEPTH {
            return None;
        }

        let matches: Vec<&DelegationRule> = self.rules.iter().filter(|r| r.applies(ctx)).collect();
        if matches.is_empty() {
            return None;
        }

        let mut suppression = self.suppression.lock().unwrap();
        let surviving: Vec<&DelegationRule> = matches
            .into_iter()
            .filter(|r| !suppression.is_suppressed(&ctx.agent_type, &r.target_type))
            .collect();
        drop(suppression);
        let candidate = surviving.into_iter().max_by(|a, b| {
            self.score(ctx, a, active_agents)
                .partial_cmp(&self.score(ctx, b, active_agents))
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

        let score = self.score(ctx, candidate, active_agents);
        Some(DelegationDecision {
            target_type: candidate.target_type.clone(),
            reason: candidate.reason.clone(),
            query: (candidate.build_query)(ctx),
            adapted_max_turns: adapted_turn_budget(base_turns, ctx.delegation_depth),
            delegation_depth: ctx.delegation_depth + 1,
            score,
        })
    }

    fn score(&self, ctx: &DelegationContext, rule: &DelegationRule, active_agents: u32) -> f64 {
        let key = (ctx.agent_type.clone(), rule.target_type.clone(), "default".to_string());
        let stats = self.stats.lock().unwrap();
        let entry = stats.get(&key);
        let historical_rate = entry.map_or(0.5, DelegationPathStats::success_rate);
        let rule_weight = entry.map_or(1.0, |s| s.rule_weight);
        let recent_trend = entry.map_or(0.0, DelegationPathStats::recent_trend);
        drop(stats);

        let base_prior = 0.5;
        let combined = (0.4 * base_prior + 0.6 * historical_rate) * rule_weight + 0.1 * recent_trend;
        combined * load_penalty(active_agents)
    }

    /// Record the outcome of a completed delegation for future scoring.
    pub fn record_outcome(&self, from: &str, to: &str, success: bool) {
        let key = (from.to_string(), to.to_string(), "default".to_string());
        let mut stats = self.stats.lock().unwrap();
        stats.entry(key).or_default().record(success);
        if !success {
            self.suppression.lock().unwrap().suppress(from, to);
        }
    }

    /// Flatten the in-memory path-stats table for persistence by
    /// [`crate::stores::DelegationStore`]. `(fromAgent, toAgent,
    /// contextType)` tuples don't round-trip through JSON object keys
    /// directly, so callers persist this as a list of entries instead.
    #[must_use]
    pub fn snapshot_stats(&self) -> Vec<DelegationPathEntry> {
        self.stats
            .lock()
            .unwrap()
            .iter()
            .map(|((from_type, to_type, context_type), stats)| DelegationPathEntry {
                from_type: from_type.clone(),
                to_type: to_type.clone(),
                context_type: context_type.clone(),
                stats: stats.clone(),
            })
            .collect()
    }

    /// Replace the in-memory path-stats table with `entries` loaded from a
    /// [`crate::stores::DelegationStore`] document. Existing in-memory
    /// entries not present in `entries` are discarded.
    pub fn load_stats(&self, entries: Vec<DelegationPathEntry>) {
        let mut stats = self.stats.lock().unwrap();
        stats.clear();
        for entry in entries {
            stats.insert((entry.from_type, entry.to_type, entry.context_type), entry.stats);
        }
    }

    /// Send the delegation over `messenger` and await a response within a
    /// fixed 3-minute window.
    pub async fn execute_delegation(
        &self,
        ctx: &DelegationContext,
        decision: &DelegationDecision,
        messenger: &dyn Messenger,
    ) -> Result<String, String> {
        let message_id = messenger
            .send_message(
                "delegation",
                &decision.target_type,
                &decision.query,
                serde_json::json!({
                    "reason": decision.reason,
                    "maxTurns": decision.adapted_max_turns,
                    "delegationDepth": decision.delegation_depth,
                }),
            )
            .await?;

        let response = tokio::time::timeout(
            Duration::from_secs(3 * 60),
            messenger.receive_response(ctx, &message_id),
        )
        .await
        .map_err(|_| "delegation timed out after 3 minutes".to_string())?;

        let outcome = response.is_ok();
        self.record_outcome(&ctx.agent_type, &decision.target_type, outcome);
        response
    }
}

/// `combined · (1 − 0.3·min(activeAgents/5, 1))`.
#[must_use]
pub fn load_penalty(active_agents: u32) -> f64 {
    1.0 - 0.3 * (f64::from(active_agents) / 5.0).min(1.0)
}

/// `max(5, baseTurns − 3·depth)`.
#[must_use]
pub fn adapted_turn_budget(base_turns: u32, depth: u32) -> u32 {
    base_turns.saturating_sub(3 * depth).max(5)
}

/// Comma-joined tool-name string for one turn; used by the agent loop to
/// detect "same progress" runs that feed [`DelegationContext::stuck_count`].
#[must_use]
pub fn progress_fingerprint(tool_names: &[String]) -> String {
    tool_names.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(agent_type: &str, depth: u32, stuck: u32) -> DelegationContext {
        DelegationContext {
            agent_type: agent_type.to_string(),
            turn: 1,
            max_turns: 20,
            last_tool_name: None,
            last_tool_error: None,
            last_tool_args: None,
            reflection: None,
            stuck_count: stuck,
            delegation_depth: depth,
        }
    }

    #[test]
    fn depth_at_max_refuses_delegation() {
        let strategy = DelegationStrategy::with_built_in_rules();
        let context = ctx("general", MAX_DELEGATION_DEPTH, 10);
        assert!(strategy.decide(&context, 20, 0).is_none());
    }

    #[test]
    fn stuck_general_delegates_to_plan() {
        let strategy = DelegationStrategy::with_built_in_rules();
        let context = ctx("general", 0, STUCK_THRESHOLD);
        let decision = strategy.decide(&context, 20, 0).unwrap();
        assert_eq!(decision.target_type, "plan");
    }

    #[test]
    fn adapted_turn_budget_floors_at_five() {
        assert_eq!(adapted_turn_budget(20, 0), 20);
        assert_eq!(adapted_turn_budget(20, 2), 14);
        assert_eq!(adapted_turn_budget(6, 3), 5);
        assert_eq!(adapted_turn_budget(6, 10), 5);
    }

    #[test]
    fn load_penalty_caps_at_five_active_agents() {
        assert!((load_penalty(0) - 1.0).abs() < f64::EPSILON);
        assert!((load_penalty(5) - 0.7).abs() < 1e-9);
        assert!((load_penalty(10) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn path_stats_rule_weight_drifts_toward_targets() {
        let mut stats = DelegationPathStats::default();
        for _ in 0..50 {
            stats.record(true);
        }
        assert!((stats.rule_weight - 1.2).abs() < 0.01);
    }

    #[test]
    fn recent_trend_needs_minimum_samples() {
        let mut stats = DelegationPathStats::default();
        stats.record(true);
        stats.record(true);
        assert_eq!(stats.recent_trend(), 0.0);
    }

    #[test]
    fn recent_trend_reflects_improving_run() {
        let mut stats = DelegationPathStats::default();
        for success in [false, false, false, true, true, true] {
            stats.record(success);
        }
        assert!(stats.recent_trend() > 0.0);
    }

    #[test]
    fn suppression_cache_blocks_then_expires_conceptually() {
        let mut cache = SuppressionCache::new();
        assert!(!cache.is_suppressed("general", "plan"));
        cache.suppress("general", "plan");
        assert!(cache.is_suppressed("general", "plan"));
    }

    #[test]
    fn stats_snapshot_and_load_round_trip() {
        let strategy = DelegationStrategy::with_built_in_rules();
        strategy.record_outcome("explore", "bash", true);
        strategy.record_outcome("explore", "bash", false);

        let snapshot = strategy.snapshot_stats();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].from_type, "explore");
        assert_eq!(snapshot[0].to_type, "bash");

        let fresh = DelegationStrategy::with_built_in_rules();
        fresh.load_stats(snapshot.clone());
        assert_eq!(fresh.snapshot_stats().len(), snapshot.len());
        assert_eq!(fresh.snapshot_stats()[0].stats.success_count, snapshot[0].stats.success_count);
    }
}
