//! The Router (§4.9): classify a message, pick a strategy, select a model
//! and tool surface, and dispatch to decomposition when the task is
//! complex enough.
//!
//! Grounded on the teacher's `services::priority_calculator` scoring
//! idiom for complexity analysis and on its `EventBus`-style attachable
//! history (here a bounded [`crate::ring_buffer::RingBuffer`] rather than
//! a broadcast channel, since routing history is read back, not fanned
//! out).

pub mod decomposition;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::RouterConfig;
use crate::ring_buffer::RingBuffer;

/// The seven message classes §4.9 step 1 classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    Question,
    SingleTool,
    MultiTool,
    Exploration,
    Refactoring,
    Background,
    Complex,
}

/// The four handling strategies a [`TaskClass`] maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Direct,
    SingleTool,
    Executor,
    SubAgent,
}

impl Strategy {
    /// The one-step-down alternative considered by history-based override
    /// (step 4): `direct -> executor`, `executor -> sub_agent`. Other
    /// strategies have no defined alternative.
    #[must_use]
    fn escalation_alternative(self) -> Option<Self> {
        match self {
            Self::Direct => Some(Self::Executor),
            Self::Executor => Some(Self::SubAgent),
            _ => None,
        }
    }
}

const TECHNICAL_TERMS: &[&str] = &[
    "function", "class", "api", "database", "algorithm", "schema", "endpoint", "async", "trait", "struct",
];

const EXPLORATION_KEYWORDS: &[&str] = &["explore", "look at", "find", "investigate", "understand"];
const REFACTOR_KEYWORDS: &[&str] = &["refactor", "clean up", "restructure", "reorganize"];
const BACKGROUND_KEYWORDS: &[&str] = &["in the background", "long-running", "while I", "async task"];
const COMPLEX_KEYWORDS: &[&str] = &["implement", "build", "design", "migrate", "create a"];
const QUESTION_STARTERS: &[&str] = &["what", "why", "how", "when", "where", "is ", "does ", "can "];

/// Count sentence-delimiter occurrences (`. ` `; ` `, then `) used by the
/// multi-instruction heuristic.
fn sentence_delimiter_count(message: &str) -> usize {
    message.matches(". ").count() + message.matches("; ").count() + message.matches(", then").count()
}

/// The result of step 1's complexity analysis and classification.
#[derive(Debug, Clone)]
pub struct ComplexityAnalysis {
    pub score: u8,
    pub class: TaskClass,
    pub strategy: Strategy,
}

/// word-count bucket + keyword bucket + multi-instruction heuristic
/// (≥ 2 sentence delimiters) + technical-term bonus, clamped to `[1, 10]`.
#[must_use]
fn score_complexity(message: &str) -> u8 {
    let lower = message.to_lowercase();
    let word_count = message.split_whitespace().count();

    let mut score: i32 = match word_count {
        0..=5 => 1,
        6..=15 => 3,
        16..=30 => 5,
        _ => 7,
    };

    if sentence_delimiter_count(&lower) >= 2 {
        score += 2;
    }

    let technical_hits = TECHNICAL_TERMS.iter().filter(|term| lower.contains(*term)).count();
    score += i32::try_from(technical_hits.min(3)).unwrap_or(0);

    if COMPLEX_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        score += 2;
    }

    score.clamp(1, 10) as u8
}

/// Regex-free keyword classification into the seven [`TaskClass`]
/// variants, checked in priority order.
#[must_use]
fn classify(message: &str, score: u8) -> TaskClass {
    let lower = message.to_lowercase();

    if QUESTION_STARTERS.iter().any(|starter| lower.trim_start().starts_with(starter)) && lower.trim_end().ends_with('?') {
        return TaskClass::Question;
    }
    if BACKGROUND_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return TaskClass::Background;
    }
    if REFACTOR_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return TaskClass::Refactoring;
    }
    if EXPLORATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return TaskClass::Exploration;
    }
    if score >= 7 {
        return TaskClass::Complex;
    }
    if sentence_delimiter_count(&lower) >= 1 || lower.contains(" and ") {
        return TaskClass::MultiTool;
    }
    TaskClass::SingleTool
}

#[must_use]
fn strategy_for_class(class: TaskClass) -> Strategy {
    match class {
        TaskClass::Question => Strategy::Direct,
        TaskClass::SingleTool => Strategy::SingleTool,
        TaskClass::MultiTool | TaskClass::Exploration => Strategy::Executor,
        TaskClass::Refactoring | TaskClass::Background | TaskClass::Complex => Strategy::SubAgent,
    }
}

/// Step 1: full complexity analysis + classification + strategy mapping.
#[must_use]
pub fn analyze(message: &str) -> ComplexityAnalysis {
    let score = score_complexity(message);
    let class = classify(message, score);
    let strategy = strategy_for_class(class);
    ComplexityAnalysis { score, class, strategy }
}

/// One entry in the routing-outcome history (§4.9 "Learning").
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub strategy: Strategy,
    pub success: bool,
}

/// The final decision `route()` produces.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub class: TaskClass,
    pub strategy: Strategy,
    pub score: u8,
    pub model: String,
    pub thinking_budget: u32,
    pub tool_surface: Vec<String>,
    pub should_decompose: bool,
}

/// The Router: stateless analysis plus a bounded history of past routing
/// outcomes consulted by step 4's history-based override.
pub struct Router {
    config: RouterConfig,
    history: RwLock<RingBuffer<RoutingOutcome>>,
}

impl Router {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        let window = config.history_window;
        Self {
            config,
            history: RwLock::new(RingBuffer::new(window)),
        }
    }

    /// `route(message)`: steps 1-6 of §4.9, minus decomposition execution
    /// itself (callers attempt [`decomposition::llm_decompose`] /
    /// [`decomposition::fallback_decompose`] when `should_decompose` is
    /// set).
    pub async fn route(&self, message: &str, plan_active: bool, recent_error_rate: f64, repo_present: bool) -> RoutingDecision {
        let analysis = analyze(message);
        let mut strategy = analysis.strategy;
        let mut score = analysis.score;

        if plan_active {
            if strategy == Strategy::SubAgent {
                strategy = Strategy::Executor;
            }
            score = score.min(self.config.decompose_threshold.saturating_sub(1));
        }

        if recent_error_rate > self.config.error_rate_upgrade_threshold && strategy == Strategy::Direct {
            strategy = Strategy::Executor;
        }

        strategy = self.history_override(strategy).await;

        let should_decompose = score >= self.config.decompose_threshold;
        let model = self.select_model(strategy, score);
        let thinking_budget = Self::select_thinking_budget(strategy, score);
        let tool_surface = self.select_tool_surface(strategy, analysis.class, repo_present);

        RoutingDecision {
            class: analysis.class,
            strategy,
            score,
            model,
            thinking_budget,
            tool_surface,
            should_decompose,
        }
    }

    /// Step 4: if the current strategy's recent success rate is below
    /// `low_success_rate_threshold` with at least `min_samples_for_override`
    /// samples, try the escalation alternative if its rate is higher.
    async fn history_override(&self, strategy: Strategy) -> Strategy {
        let history = self.history.read().await;
        let Some(alternative) = strategy.escalation_alternative() else { return strategy };

        let current_rate = success_rate_for(&history, strategy);
        let Some((current_rate, current_samples)) = current_rate else { return strategy };
        if current_samples < self.config.min_samples_for_override || current_rate >= self.config.low_success_rate_threshold {
            return strategy;
        }

        match success_rate_for(&history, alternative) {
            Some((alt_rate, _)) if alt_rate > current_rate => alternative,
            _ => strategy,
        }
    }

    /// Step 6: fast model for `direct` + low-score `single_tool`, default
    /// model otherwise.
    fn select_model(&self, strategy: Strategy, score: u8) -> String {
        let use_fast = strategy == Strategy::Direct || (strategy == Strategy::SingleTool && score < 4);
        if use_fast {
            self.config.fast_model.clone()
        } else {
            self.config.default_model.clone()
        }
    }

    /// Step 6: thinking budget `0 / 1_000 / 4_000 / 8_000` tokens by
    /// strategy and score.
    fn select_thinking_budget(strategy: Strategy, score: u8) -> u32 {
        match strategy {
            Strategy::Direct => 0,
            Strategy::SingleTool => 1_000,
            Strategy::Executor => {
                if score >= 7 {
                    8_000
                } else {
                    4_000
                }
            }
            Strategy::SubAgent => 8_000,
        }
    }

    /// Step 6: core surface plus conditional extras by strategy/class.
    fn select_tool_surface(&self, strategy: Strategy, class: TaskClass, repo_present: bool) -> Vec<String> {
        let mut tags = vec!["core".to_string()];
        if repo_present {
            tags.push("git".to_string());
        }
        match strategy {
            Strategy::Direct => {}
            Strategy::SingleTool => tags.push("file_ops".to_string()),
            Strategy::Executor => {
                tags.push("file_ops".to_string());
                tags.push("advanced".to_string());
                if class == TaskClass::Exploration {
                    tags.push("web".to_string());
                }
            }
            Strategy::SubAgent => {
                tags.extend(
                    ["file_ops", "advanced", "planning", "agent", "memory", "semantic"]
                        .map(str::to_string),
                );
            }
        }
        tags
    }

    /// `recordRoutingOutcome`: appends to the bounded history that drives
    /// step 4's learned success rates.
    pub async fn record_routing_outcome(&self, strategy: Strategy, success: bool) {
        self.history.write().await.push(RoutingOutcome { strategy, success });
    }
}

/// `(rate, sample_count)` for `strategy` among recorded outcomes, or `None`
/// if it has never been recorded.
fn success_rate_for(history: &RingBuffer<RoutingOutcome>, strategy: Strategy) -> Option<(f64, usize)> {
    let matching: Vec<&RoutingOutcome> = history.iter().filter(|o| o.strategy == strategy).collect();
    if matching.is_empty() {
        return None;
    }
    let successes = matching.iter().filter(|o| o.success).count();
    Some((successes as f64 / matching.len() as f64, matching.len()))
}
