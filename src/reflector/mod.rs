//! Reflector (§4.4): maps a tool error to a category, suggested fix,
//! alternative tool, and a retry flag, with a learned-error store consulted
//! first and an optional LLM semantic fallback on pattern-table miss.
//!
//! Grounded on the teacher's `services::mod::extract_json_from_response`
//! fenced/prose-JSON tolerance idiom (reused for the semantic-fallback call)
//! and the ordered-pattern-table classification style used throughout the
//! teacher's validator/MCP modules.

mod patterns;

pub use patterns::ReflectionCategory;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;

/// Retryable tool-error categories per §4.6 step 6b / §8.
const RETRYABLE: &[ReflectionCategory] = &[
    ReflectionCategory::Timeout,
    ReflectionCategory::NetworkError,
    ReflectionCategory::RateLimit,
];

/// One prediction surfaced for `file_not_found` errors, sourced from the
/// file-predictor collaborator.
pub trait FilePredictor: Send + Sync {
    fn predict_similar(&self, missing_path: &str) -> Vec<String>;
}

/// A predictor with no index to consult; always returns nothing.
#[derive(Default)]
pub struct NullFilePredictor;

impl FilePredictor for NullFilePredictor {
    fn predict_similar(&self, _missing_path: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Structured reflection output for one `(tool, args, error)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    pub category: ReflectionCategory,
    pub suggestion: String,
    pub should_retry: bool,
    pub suggested_fix: Option<String>,
    pub alternative_tool: Option<String>,
    /// Id of the learned-store entry that produced this result, if any,
    /// for later `record_solution_success`/`record_solution_failure`.
    pub matched_entry_id: Option<String>,
    /// Populated only for `file_not_found`.
    pub similar_paths: Vec<String>,
}

impl ReflectionResult {
    /// The "Tool / Category / Error / Assessment / Alternative / Retry"
    /// markdown intervention block surfaced to the model.
    #[must_use]
    pub fn intervention_markdown(&self, tool_name: &str, error_text: &str) -> String {
        let mut block = format!(
            "### Tool Error Reflection\n- **Tool:** {tool_name}\n- **Category:** {:?}\n- **Error:** {error_text}\n- **Assessment:** {}\n",
            self.category, self.suggestion
        );
        if let Some(alt) = &self.alternative_tool {
            block.push_str(&format!("- **Alternative:** try `{alt}`\n"));
        }
        block.push_str(&format!("- **Retry:** {}\n", self.should_retry));
        if !self.similar_paths.is_empty() {
            block.push_str(&format!(
                "- **Similar paths:** {}\n",
                self.similar_paths.join(", ")
            ));
        }
        block
    }
}

/// One learned (data-driven) error-pattern entry, accumulated via
/// `learn_from_error` and the LLM semantic fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedErrorEntry {
    pub id: String,
    pub tool: String,
    pub category: ReflectionCategory,
    pub pattern: String,
    pub solution: String,
    pub tags: Vec<String>,
    pub success_count: u32,
    pub failure_count: u32,
}

impl LearnedErrorEntry {
    fn prior(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            f64::from(self.success_count) / f64::from(total)
        }
    }
}

/// In-memory learned-error map, persisted by the caller via
/// [`crate::stores::JsonFileStore`] (this type is the document shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnedErrorStore {
    entries: HashMap<String, LearnedErrorEntry>,
}

impl LearnedErrorStore {
    /// Best match by substring/tag similarity against `tool` + `error_text`.
    /// Ties broken by highest learned success prior.
    #[must_use]
    pub fn best_match(&self, tool: &str, error_text: &str) -> Option<&LearnedErrorEntry> {
        let error_lower = error_text.to_lowercase();
        self.entries
            .values()
            .filter(|e| e.tool == tool || e.tool == "*")
            .filter(|e| {
                error_lower.contains(&e.pattern.to_lowercase())
                    || e.tags.iter().any(|t| error_lower.contains(&t.to_lowercase()))
            })
            .max_by(|a, b| a.prior().partial_cmp(&b.prior()).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn learn(
        &mut self,
        category: ReflectionCategory,
        tool: impl Into<String>,
        pattern: impl Into<String>,
        solution: impl Into<String>,
        tags: Vec<String>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.entries.insert(
            id.clone(),
            LearnedErrorEntry {
                id: id.clone(),
                tool: tool.into(),
                category,
                pattern: pattern.into(),
                solution: solution.into(),
                tags,
                success_count: 0,
                failure_count: 0,
            },
        );
        id
    }

    pub fn record_success(&mut self, entry_id: &str) {
        if let Some(e) = self.entries.get_mut(entry_id) {
            e.success_count += 1;
        }
    }

    pub fn record_failure(&mut self, entry_id: &str) {
        if let Some(e) = self.entries.get_mut(entry_id) {
            e.failure_count += 1;
        }
    }
}

/// No-op per Design Note 9(c): persistence of learned error priors goes
/// through [`LearnedErrorStore`] directly, not via agent checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectorSnapshot;

/// The Reflector itself: owns the compiled pattern table and the in-memory
/// learned-error store, optionally backed by an LLM client for semantic
/// fallback classification.
pub struct Reflector {
    learned: std::sync::RwLock<LearnedErrorStore>,
    llm: Option<Arc<dyn LlmClient>>,
    file_predictor: Arc<dyn FilePredictor>,
    semantic_fallback_enabled: bool,
}

impl Reflector {
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmClient>>, file_predictor: Arc<dyn FilePredictor>) -> Self {
        Self {
            learned: std::sync::RwLock::new(LearnedErrorStore::default()),
            llm,
            file_predictor,
            semantic_fallback_enabled: true,
        }
    }

    #[must_use]
    pub fn with_learned(mut self, learned: LearnedErrorStore) -> Self {
        self.learned = std::sync::RwLock::new(learned);
        self
    }

    #[must_use]
    pub fn learned_snapshot(&self) -> LearnedErrorStore {
        self.learned.read().unwrap().clone()
    }

    pub fn learn_from_error(
        &self,
        category: ReflectionCategory,
        tool: impl Into<String>,
        pattern: impl Into<String>,
        solution: impl Into<String>,
        tags: Vec<String>,
    ) -> String {
        self.learned.write().unwrap().learn(category, tool, pattern, solution, tags)
    }

    pub fn record_solution_success(&self, entry_id: &str) {
        self.learned.write().unwrap().record_success(entry_id);
    }

    pub fn record_solution_failure(&self, entry_id: &str) {
        self.learned.write().unwrap().record_failure(entry_id);
    }

    /// Explicit no-op per Design Note 9(c).
    #[must_use]
    pub fn snapshot(&self) -> ReflectorSnapshot {
        ReflectorSnapshot
    }

    /// Explicit no-op per Design Note 9(c).
    pub fn restore(&self, _snapshot: ReflectorSnapshot) {}

    /// Classify `(tool_name, args, error_text)` per the four-step pipeline
    /// in §4.4.
    pub async fn reflect(&self, tool_name: &str, args: &serde_json::Value, error_text: &str) -> ReflectionResult {
        let learned_hint = self.learned.read().unwrap().best_match(tool_name, error_text).cloned();

        if let Some(found) = patterns::match_pattern(error_text) {
            return self.finish(found, tool_name, learned_hint);
        }

        if self.semantic_fallback_enabled {
            if let Some(llm) = &self.llm {
                if let Some(result) = self.semantic_classify(llm.as_ref(), tool_name, args, error_text).await {
                    self.learned.write().unwrap().learn(
                        result.category,
                        tool_name,
                        error_text.chars().take(80).collect::<String>(),
                        result.suggested_fix.clone().unwrap_or_default(),
                        vec![format!("{:?}", result.category)],
                    );
                    return result;
                }
            }
        }

        self.finish(patterns::PatternMatch::unknown(), tool_name, learned_hint)
    }

    fn finish(
        &self,
        found: patterns::PatternMatch,
        tool_name: &str,
        learned_hint: Option<LearnedErrorEntry>,
    ) -> ReflectionResult {
        let similar_paths = if found.category == ReflectionCategory::FileNotFound {
            let missing = found
                .suggested_fix
                .clone()
                .unwrap_or_else(|| tool_name.to_string());
            self.file_predictor.predict_similar(&missing)
        } else {
            Vec::new()
        };
        let suggestion = match &learned_hint {
            Some(hint) => format!("{} (learned context: {})", found.suggestion, hint.solution),
            None => found.suggestion,
        };
        ReflectionResult {
            category: found.category,
            suggestion,
            should_retry: found.should_retry,
            suggested_fix: found.suggested_fix,
            alternative_tool: found.alternative_tool,
            matched_entry_id: learned_hint.map(|h| h.id),
            similar_paths,
        }
    }

    async fn semantic_classify(
        &self,
        llm: &dyn LlmClient,
        tool_name: &str,
        args: &serde_json::Value,
        error_text: &str,
    ) -> Option<ReflectionResult> {
        let prompt = format!(
            "Classify this tool error as strict JSON with fields \
             {{category, suggestion, should_retry, suggested_fix, alternative_tool}}.\n\
             Tool: {tool_name}\nArgs: {args}\nError: {error_text}"
        );
        let mut stream = llm.send_message(&prompt).await.ok()?;
        let collected = stream.collect().await.ok()?;
        let json = extract_json_from_response(&collected.text)?;
        let parsed: SemanticClassification = serde_json::from_value(json).ok()?;
        Some(ReflectionResult {
            category: parsed.category,
            suggestion: parsed.suggestion,
            should_retry: parsed.should_retry,
            suggested_fix: parsed.suggested_fix,
            alternative_tool: parsed.alternative_tool,
            matched_entry_id: None,
            similar_paths: Vec::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SemanticClassification {
    category: ReflectionCategory,
    suggestion: String,
    should_retry: bool,
    suggested_fix: Option<String>,
    alternative_tool: Option<String>,
}

/// Pull the first JSON object or array out of `text`, tolerating fenced
/// code blocks and surrounding prose. Mirrors the teacher's
/// `extract_json_from_response`.
#[must_use]
pub fn extract_json_from_response(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    static FENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").unwrap());
    if let Some(caps) = fence.captures(text) {
        if let Ok(value) = serde_json::from_str(caps[1].trim()) {
            return Some(value);
        }
    }
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    if end > start {
        serde_json::from_str(&text[start..=end]).ok()
    } else {
        None
    }
}

/// Whether `category` is automatically retried per §4.6/§8.
#[must_use]
pub fn is_retryable(category: ReflectionCategory) -> bool {
    RETRYABLE.contains(&category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pattern_table_match_wins_without_llm() {
        let reflector = Reflector::new(None, Arc::new(NullFilePredictor));
        let result = reflector
            .reflect("read", &serde_json::json!({"path": "x"}), "No such file or directory")
            .await;
        assert_eq!(result.category, ReflectionCategory::FileNotFound);
    }

    #[tokio::test]
    async fn unknown_error_without_llm_falls_back_to_unknown_category() {
        let reflector = Reflector::new(None, Arc::new(NullFilePredictor));
        let result = reflector
            .reflect("bash", &serde_json::json!({}), "some bespoke gibberish")
            .await;
        assert_eq!(result.category, ReflectionCategory::Unknown);
    }

    #[test]
    fn learned_store_best_match_prefers_matching_tool_and_substring() {
        let mut store = LearnedErrorStore::default();
        let id = store.learn(
            ReflectionCategory::CompilationError,
            "bash",
            "cannot find type",
            "check imports",
            vec!["type-error".into()],
        );
        store.record_success(&id);
        let found = store.best_match("bash", "error: cannot find type `Foo`").unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        let value = extract_json_from_response(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn retryable_categories_match_spec() {
        assert!(is_retryable(ReflectionCategory::Timeout));
        assert!(is_retryable(ReflectionCategory::NetworkError));
        assert!(is_retryable(ReflectionCategory::RateLimit));
        assert!(!is_retryable(ReflectionCategory::SyntaxError));
    }

    #[test]
    fn intervention_markdown_includes_core_fields() {
        let result = ReflectionResult {
            category: ReflectionCategory::Timeout,
            suggestion: "retry with backoff".into(),
            should_retry: true,
            suggested_fix: None,
            alternative_tool: Some("bash".into()),
            matched_entry_id: None,
            similar_paths: Vec::new(),
        };
        let block = result.intervention_markdown("web_fetch", "deadline exceeded");
        assert!(block.contains("Tool"));
        assert!(block.contains("web_fetch"));
        assert!(block.contains("bash"));
    }
}
