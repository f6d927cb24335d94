//! Decomposition (§4.9.1): break a message into a dependency DAG of
//! subtasks, and walk that DAG to execute them.
//!
//! Grounded on `extract_json_from_response` (teacher `services::mod`,
//! reused from [`crate::reflector`]) for the strict-JSON LLM path, and on
//! the teacher's `services::dependency_resolver` ready-set/Kahn's-style
//! walk for execution ordering.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;
use crate::reflector::extract_json_from_response;

const VALID_AGENT_TYPES: &[&str] = &["explore", "bash", "general", "plan"];
const OUTPUT_TRUNCATE_CHARS: usize = 1000;

/// One subtask in a decomposition plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub id: String,
    pub prompt: String,
    pub agent_type: String,
    pub priority: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The full decomposition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionPlan {
    pub subtasks: Vec<SubtaskSpec>,
    pub can_parallel: bool,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct LlmDecomposition {
    subtasks: Vec<SubtaskSpec>,
    can_parallel: bool,
    reasoning: String,
}

/// Ask the model for a strict-JSON decomposition, validating subtask count
/// and agent types; returns `None` on any transport/parse/validation
/// failure so the caller can fall back to [`fallback_decompose`].
pub async fn llm_decompose(llm: &dyn LlmClient, message: &str, max_subtasks: usize) -> Option<DecompositionPlan> {
    let prompt = format!(
        "Decompose this task into subtasks as strict JSON: \
         {{\"subtasks\": [{{\"id\": \"...\", \"prompt\": \"...\", \"agent_type\": \"explore|bash|general|plan\", \
         \"priority\": \"low|normal|high\", \"dependencies\": [\"...\"]}}], \"can_parallel\": bool, \"reasoning\": \"...\"}}. \
         At most {max_subtasks} subtasks. Task: {message}"
    );
    let mut stream = llm.send_message(&prompt).await.ok()?;
    let collected = stream.collect().await.ok()?;
    let json = extract_json_from_response(&collected.text)?;
    let parsed: LlmDecomposition = serde_json::from_value(json).ok()?;
    if parsed.subtasks.is_empty() || parsed.subtasks.len() > max_subtasks {
        return None;
    }
    if !parsed.subtasks.iter().all(|s| VALID_AGENT_TYPES.contains(&s.agent_type.as_str())) {
        return None;
    }
    Some(DecompositionPlan {
        subtasks: parsed.subtasks,
        can_parallel: parsed.can_parallel,
        reasoning: parsed.reasoning,
    })
}

/// Deterministic regex/keyword fallback used when no LLM is configured or
/// the LLM path fails: `X and Y` becomes parallel siblings, `first X, then
/// Y` / "after" becomes a sequential chain, otherwise a per-type recipe.
#[must_use]
pub fn fallback_decompose(message: &str) -> DecompositionPlan {
    let lower = message.to_lowercase();

    // A refactor instruction is one coherent multi-step procedure even
    // when it reads like "X and Y" ("refactor auth and update tests" is
    // the refactor recipe's own verify step, not a second independent
    // task) — checked ahead of the generic and/then splitters below.
    if lower.contains("refactor") {
        return recipe_for(&lower, message);
    }

    if let Some((first, second)) = split_sequential(&lower, message) {
        return DecompositionPlan {
            subtasks: vec![
                SubtaskSpec {
                    id: "step-1".to_string(),
                    prompt: first,
                    agent_type: "general".to_string(),
                    priority: "normal".to_string(),
                    dependencies: Vec::new(),
                },
                SubtaskSpec {
                    id: "step-2".to_string(),
                    prompt: second,
                    agent_type: "general".to_string(),
                    priority: "normal".to_string(),
                    dependencies: vec!["step-1".to_string()],
                },
            ],
            can_parallel: false,
            reasoning: "sequential chain detected (first/then/after)".to_string(),
        };
    }

    if let Some((a, b)) = split_parallel(message) {
        return DecompositionPlan {
            subtasks: vec![
                SubtaskSpec {
                    id: "branch-a".to_string(),
                    prompt: a,
                    agent_type: "general".to_string(),
                    priority: "normal".to_string(),
                    dependencies: Vec::new(),
                },
                SubtaskSpec {
                    id: "branch-b".to_string(),
                    prompt: b,
                    agent_type: "general".to_string(),
                    priority: "normal".to_string(),
                    dependencies: Vec::new(),
                },
            ],
            can_parallel: true,
            reasoning: "parallel siblings detected (X and Y)".to_string(),
        };
    }

    recipe_for(&lower, message)
}

fn split_sequential(lower: &str, original: &str) -> Option<(String, String)> {
    for marker in ["then", "after"] {
        if let Some(idx) = lower.find(marker) {
            let first = original[..idx].trim().trim_start_matches("first").trim().trim_end_matches(',').trim();
            let second = original[idx + marker.len()..].trim().trim_start_matches(',').trim();
            if !first.is_empty() && !second.is_empty() {
                return Some((first.to_string(), second.to_string()));
            }
        }
    }
    None
}

fn split_parallel(message: &str) -> Option<(String, String)> {
    let idx = message.find(" and ")?;
    let a = message[..idx].trim();
    let b = message[idx + 5..].trim();
    if a.is_empty() || b.is_empty() {
        None
    } else {
        Some((a.to_string(), b.to_string()))
    }
}

fn recipe_for(lower: &str, original: &str) -> DecompositionPlan {
    let (stages, reasoning): (&[&str], &str) = if lower.contains("refactor") {
        (&["explore", "plan", "general", "bash"], "refactor recipe: explore, plan, execute, verify")
    } else if lower.contains("test") {
        (&["explore", "general", "bash"], "complex-with-tests recipe: explore, implement, test")
    } else if lower.contains("create") || lower.contains("implement") || lower.contains("add") {
        (&["explore", "general"], "complex-creation recipe: explore, create")
    } else {
        (&["general"], "single general subtask")
    };

    let subtasks = stages
        .iter()
        .enumerate()
        .map(|(idx, agent_type)| SubtaskSpec {
            id: format!("step-{}", idx + 1),
            prompt: format!("{agent_type}: {original}"),
            agent_type: (*agent_type).to_string(),
            priority: "normal".to_string(),
            dependencies: if idx == 0 { Vec::new() } else { vec![format!("step-{idx}")] },
        })
        .collect();

    DecompositionPlan {
        subtasks,
        can_parallel: false,
        reasoning: reasoning.to_string(),
    }
}

/// An outcome for one subtask: success text or error text, truncated to
/// [`OUTPUT_TRUNCATE_CHARS`].
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    pub id: String,
    pub success: bool,
    pub output: String,
}

/// Summary of executing a [`DecompositionPlan`].
#[derive(Debug, Clone, Default)]
pub struct DecompositionReport {
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<SubtaskOutcome>,
}

impl DecompositionReport {
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed out of {} subtasks",
            self.succeeded,
            self.failed,
            self.succeeded + self.failed
        )
    }
}

/// Runs one subtask. An external collaborator since the orchestration core
/// never spawns sub-agents itself outside [`crate::coordinator`] — kept as
/// a narrow seam the same way `Tool`/`Messenger` are.
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn execute(&self, subtask: &SubtaskSpec) -> Result<String, String>;
}

fn truncate(text: &str) -> String {
    if text.len() > OUTPUT_TRUNCATE_CHARS {
        let mut truncated = text.chars().take(OUTPUT_TRUNCATE_CHARS).collect::<String>();
        truncated.push('…');
        truncated
    } else {
        text.to_string()
    }
}

/// Walk the plan's dependency DAG: each iteration find subtasks whose
/// dependencies are all already-recorded successes; if `can_parallel` and
/// at least 2 are ready, run them concurrently under a semaphore of
/// `parallel_cap`, else run sequentially. Stops making progress (and
/// returns) once no further subtask can become ready.
pub async fn execute_decomposition(
    plan: &DecompositionPlan,
    executor: &dyn SubtaskExecutor,
    parallel_cap: usize,
) -> DecompositionReport {
    let mut report = DecompositionReport::default();
    let mut done: HashSet<String> = HashSet::new();
    let mut remaining: Vec<&SubtaskSpec> = plan.subtasks.iter().collect();

    while !remaining.is_empty() {
        let (ready, not_ready): (Vec<&SubtaskSpec>, Vec<&SubtaskSpec>) = remaining
            .into_iter()
            .partition(|s| s.dependencies.iter().all(|d| done.contains(d)));

        if ready.is_empty() {
            break;
        }

        if plan.can_parallel && ready.len() >= 2 {
            let semaphore = tokio::sync::Semaphore::new(parallel_cap.max(1));
            let futures = ready.iter().map(|subtask| async {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                (subtask.id.clone(), executor.execute(subtask).await)
            });
            for (id, outcome) in futures::future::join_all(futures).await {
                record_outcome(&mut report, &mut done, id, outcome);
            }
        } else {
            for subtask in &ready {
                let outcome = executor.execute(subtask).await;
                record_outcome(&mut report, &mut done, subtask.id.clone(), outcome);
            }
        }

        remaining = not_ready;
    }

    report
}

fn record_outcome(report: &mut DecompositionReport, done: &mut HashSet<String>, id: String, outcome: Result<String, String>) {
    done.insert(id.clone());
    match outcome {
        Ok(text) => {
            report.succeeded += 1;
            report.outcomes.push(SubtaskOutcome { id, success: true, output: truncate(&text) });
        }
        Err(text) => {
            report.failed += 1;
            report.outcomes.push(SubtaskOutcome { id, success: false, output: truncate(&text) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_detects_sequential_markers() {
        let plan = fallback_decompose("first explore the code, then fix the bug");
        assert_eq!(plan.subtasks.len(), 2);
        assert!(!plan.can_parallel);
        assert_eq!(plan.subtasks[1].dependencies, vec!["step-1".to_string()]);
    }

    #[test]
    fn fallback_detects_parallel_markers() {
        let plan = fallback_decompose("update the docs and fix the tests");
        assert_eq!(plan.subtasks.len(), 2);
        assert!(plan.can_parallel);
    }

    #[test]
    fn fallback_applies_refactor_recipe() {
        let plan = fallback_decompose("refactor the auth module");
        assert_eq!(plan.subtasks.len(), 4);
        assert_eq!(plan.subtasks[0].agent_type, "explore");
        assert!(!plan.can_parallel);
    }

    #[test]
    fn fallback_prefers_refactor_recipe_over_and_splitting() {
        let plan = fallback_decompose("refactor auth and update tests");
        assert_eq!(plan.subtasks.len(), 4);
        assert!(!plan.can_parallel);
        assert_eq!(
            plan.subtasks.iter().map(|s| s.agent_type.as_str()).collect::<Vec<_>>(),
            vec!["explore", "plan", "general", "bash"]
        );
    }

    #[test]
    fn fallback_applies_single_subtask_recipe_otherwise() {
        let plan = fallback_decompose("say hello");
        assert_eq!(plan.subtasks.len(), 1);
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl SubtaskExecutor for AlwaysSucceeds {
        async fn execute(&self, subtask: &SubtaskSpec) -> Result<String, String> {
            Ok(format!("done: {}", subtask.id))
        }
    }

    struct FailsOne(String);

    #[async_trait]
    impl SubtaskExecutor for FailsOne {
        async fn execute(&self, subtask: &SubtaskSpec) -> Result<String, String> {
            if subtask.id == self.0 {
                Err("boom".to_string())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[tokio::test]
    async fn executes_a_sequential_chain_in_order() {
        let plan = fallback_decompose("first explore the repo, then implement the fix");
        let report = execute_decomposition(&plan, &AlwaysSucceeds, 5).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn executes_parallel_branches_and_reports_failures() {
        let plan = fallback_decompose("update docs and fix tests");
        let report = execute_decomposition(&plan, &FailsOne("branch-b".to_string()), 5).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn stops_when_no_further_subtask_can_become_ready() {
        let plan = DecompositionPlan {
            subtasks: vec![SubtaskSpec {
                id: "orphan".to_string(),
                prompt: "x".to_string(),
                agent_type: "general".to_string(),
                priority: "normal".to_string(),
                dependencies: vec!["missing".to_string()],
            }],
            can_parallel: false,
            reasoning: "test".to_string(),
        };
        let report = execute_decomposition(&plan, &AlwaysSucceeds, 5).await;
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 0);
    }
}
