//! The Tree Planner (§4.7): build, score, expand, search, and replan a
//! tree of candidate actions.
//!
//! Grounded on Design Note 9's node/tree ownership (children hold ids, a
//! single `node_index` owned by the tree) and on the teacher's
//! `services::dependency_resolver` DAG-traversal style for the
//! readiness/reachability walks `PlanTree` itself implements. The search
//! strategies (`beam`/`mcts`/`astar`) and the `priority_calculator.rs`
//! weighted-scoring idiom live in their own submodules; this module is
//! the orchestration surface a caller actually drives.

pub mod astar;
pub mod beam;
pub mod expansion;
pub mod mcts;
pub mod replan;
pub mod scoring;

use uuid::Uuid;

use crate::config::{PlannerAlgorithm, TreePlannerConfig};
use crate::domain::plan::{PlanNode, PlanTree, PlannedAction};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::learning::StrategyStore;
use crate::llm::LlmClient;
use crate::reflector::extract_json_from_response;

use scoring::{seed_priors, ScoreWeights};

const MAX_PROMPT_CHARS: usize = 500;
const DEFAULT_STEP_CAP: usize = 10;

/// One parsed `STEP: <agentType> | <prompt>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedStep {
    agent_type: String,
    prompt: String,
}

/// Parse the model's `STEP: <agentType> | <prompt>` lines: reject
/// malformed, empty, or duplicate steps, truncate prompts over
/// [`MAX_PROMPT_CHARS`], and cap the list at `max_steps`.
fn parse_step_lines(text: &str, max_steps: usize) -> Vec<ParsedStep> {
    let mut steps = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("STEP:") else { continue };
        let Some((agent_type, prompt)) = rest.split_once('|') else { continue };
        let agent_type = agent_type.trim().to_string();
        let mut prompt = prompt.trim().to_string();
        if agent_type.is_empty() || prompt.is_empty() {
            continue;
        }
        if prompt.len() > MAX_PROMPT_CHARS {
            prompt.truncate(MAX_PROMPT_CHARS);
        }
        let step = ParsedStep { agent_type, prompt };
        if steps.contains(&step) {
            continue;
        }
        steps.push(step);
        if steps.len() >= max_steps {
            break;
        }
    }
    steps
}

/// Fixed recipes keyed by keyword class, used when the model is
/// unavailable or produces no parseable steps.
fn fallback_recipe(prompt: &str) -> Vec<ParsedStep> {
    let lower = prompt.to_lowercase();
    let class = if lower.contains("implement") || lower.contains("add") || lower.contains("create") {
        "implement"
    } else if lower.contains("fix") || lower.contains("bug") || lower.contains("broken") {
        "fix"
    } else if lower.contains("refactor") || lower.contains("clean up") {
        "refactor"
    } else if lower.contains("test") {
        "test"
    } else {
        "generic"
    };

    let stages: &[&str] = match class {
        "implement" => &["explore", "plan", "general"],
        "fix" => &["explore", "bash", "general"],
        "refactor" => &["explore", "plan", "general"],
        "test" => &["general", "bash"],
        _ => &["general"],
    };

    stages
        .iter()
        .map(|stage| ParsedStep {
            agent_type: (*stage).to_string(),
            prompt: format!("{stage}: {prompt}"),
        })
        .collect()
}

fn last_step_is_test_or_bash(steps: &[ParsedStep]) -> bool {
    steps
        .last()
        .is_some_and(|step| step.agent_type == "bash" || step.prompt.to_lowercase().contains("test"))
}

/// Coarse keyword classification used to look up a strategy-store
/// recommendation before falling back to the recipe table.
fn classify_task_type(prompt: &str) -> &'static str {
    let lower = prompt.to_lowercase();
    if lower.contains("refactor") {
        "refactor"
    } else if lower.contains("fix") || lower.contains("bug") {
        "fix"
    } else if lower.contains("test") {
        "test"
    } else if lower.contains("implement") || lower.contains("add") || lower.contains("create") {
        "implement"
    } else {
        "generic"
    }
}

#[derive(Debug, serde::Deserialize)]
struct StepLinesResponse {
    steps: Vec<String>,
}

/// Ask the model for an ordered list of `STEP:` lines, tolerating both a
/// bare newline-delimited response and a `{"steps": [...]}` JSON body.
async fn llm_generate_steps(llm: &dyn LlmClient, prompt: &str, goal: &str) -> Option<String> {
    let request = format!(
        "Break this goal into an ordered list of steps, one per line, each formatted exactly as \
         `STEP: <agentType> | <prompt>` where agentType is one of explore, plan, general, bash. \
         Goal: {goal}\nTask: {prompt}"
    );
    let mut stream = llm.send_message(&request).await.ok()?;
    let collected = stream.collect().await.ok()?;
    if let Some(json) = extract_json_from_response(&collected.text) {
        if let Ok(parsed) = serde_json::from_value::<StepLinesResponse>(json) {
            return Some(
                parsed
                    .steps
                    .into_iter()
                    .map(|s| format!("STEP: {s}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
    }
    Some(collected.text)
}

fn parsed_step_to_action(step: &ParsedStep) -> PlannedAction {
    match step.agent_type.as_str() {
        "bash" => PlannedAction::tool_call("bash", serde_json::json!({ "command": step.prompt }), step.prompt.clone()),
        other => PlannedAction::delegate(other, step.prompt.clone()),
    }
}

/// The Tree Planner: stateless save for its configuration, an optional LLM
/// client, and a handle to the strategy store consulted at build time.
pub struct TreePlanner {
    config: TreePlannerConfig,
    weights: ScoreWeights,
}

impl TreePlanner {
    #[must_use]
    pub fn new(config: TreePlannerConfig) -> Self {
        let weights = ScoreWeights::new(
            config.weight_success_prob,
            config.weight_cost,
            config.weight_progress,
            config.depth_penalty,
        );
        Self { config, weights }
    }

    /// Build a fresh tree for `goal` rooted at a placeholder Verify action
    /// representing the overall objective, with candidate first steps
    /// inserted as children. Preferred path: one LLM call parsed as
    /// `STEP:` lines; falls back to a fixed keyword recipe. Consults the
    /// strategy store (if attached) for a recommended strategy prepended
    /// to the candidate list.
    pub async fn build_tree(
        &self,
        llm: Option<&dyn LlmClient>,
        strategy_store: Option<&StrategyStore>,
        prompt: &str,
        goal: &str,
        max_depth: u32,
    ) -> OrchestratorResult<PlanTree> {
        let cap = if max_depth == 0 {
            DEFAULT_STEP_CAP
        } else {
            (max_depth as usize).min(DEFAULT_STEP_CAP)
        };

        let mut steps = if let Some(llm) = llm {
            match llm_generate_steps(llm, prompt, goal).await {
                Some(text) => parse_step_lines(&text, cap),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        if steps.is_empty() {
            steps = fallback_recipe(prompt);
            steps.truncate(cap.max(1));
        }

        if steps.is_empty() {
            return Err(OrchestratorError::NoStepsParsed);
        }

        if !last_step_is_test_or_bash(&steps) {
            steps.push(ParsedStep {
                agent_type: "verify".to_string(),
                prompt: format!("verify: {goal}"),
            });
        }

        if let Some(store) = strategy_store {
            let task_type = classify_task_type(prompt);
            if let Some(recommended) = store.recommended_strategy_for(task_type).await {
                steps.insert(
                    0,
                    ParsedStep {
                        agent_type: recommended,
                        prompt: format!("apply recommended strategy for: {prompt}"),
                    },
                );
            }
        }

        let root = PlanNode::root(PlannedAction::verify(goal.to_string()));
        let mut tree = PlanTree::new(root, goal, self.config.max_tree_nodes);
        let root_id = tree.root_id;

        for step in &steps {
            let action = if step.agent_type == "verify" {
                PlannedAction::verify(step.prompt.clone())
            } else {
                parsed_step_to_action(step)
            };
            let (success_prob, cost_estimate, goal_progress) = seed_priors(&action);
            let Some(root_node) = tree.node_index.get(&root_id).cloned() else { break };
            let mut node = PlanNode::child_of(&root_node, action);
            node.success_prob = success_prob;
            node.cost_estimate = cost_estimate;
            node.goal_progress = goal_progress;
            node.score = self.weights.score(success_prob, cost_estimate, goal_progress, node.depth);
            let _ = tree.insert_child(root_id, node);
        }

        let path = self.select_best_path(&tree);
        tree.best_path = path;
        Ok(tree)
    }

    /// The configured node cap, for callers reconstructing a tree (e.g.
    /// from a checkpoint) that need the same bound the planner itself uses.
    #[must_use]
    pub fn max_tree_nodes(&self) -> usize {
        self.config.max_tree_nodes
    }

    /// Dispatch to the configured search algorithm.
    #[must_use]
    pub fn select_best_path(&self, tree: &PlanTree) -> Vec<Uuid> {
        match self.config.algorithm {
            PlannerAlgorithm::Beam => beam::select_best_path(tree, self.config.beam_width, tree.max_depth.max(1)),
            PlannerAlgorithm::Mcts => {
                let mut scratch = tree.clone();
                let mut rng = rand::thread_rng();
                mcts::run(&mut scratch, self.config.mcts_iterations, &mut rng);
                mcts::best_path(&scratch)
            }
            PlannerAlgorithm::AStar => astar::select_best_path(tree),
        }
    }

    /// All pending nodes ready to execute right now.
    #[must_use]
    pub fn ready_actions(&self, tree: &PlanTree) -> Vec<Uuid> {
        tree.ready_actions()
    }

    /// Record an action's outcome and, if it lies on the current best path
    /// and failed, attempt to replan.
    pub fn record_result(
        &self,
        tree: &mut PlanTree,
        node_id: Uuid,
        succeeded: bool,
        result: Option<String>,
        goal_progress: Option<f64>,
        alternative: Option<&str>,
        replan_on_failure: bool,
    ) -> OrchestratorResult<()> {
        tree.record_result(node_id, succeeded, result, goal_progress);
        if succeeded || !replan_on_failure {
            return Ok(());
        }
        replan::replan(
            tree,
            node_id,
            alternative,
            self.config.max_replans,
            &self.weights,
            |t| self.select_best_path(t),
        )
        .map(|_| ())
    }

    /// Expand `node_id` with the appropriate candidate kind for its
    /// current status and insert the results as new children.
    pub fn expand(&self, tree: &mut PlanTree, node_id: Uuid, alternative_tool: Option<&str>) -> Vec<Uuid> {
        let Some(node) = tree.node_index.get(&node_id).cloned() else { return Vec::new() };
        let candidates = expansion::expansion_candidates(&node, alternative_tool);
        expansion::expand_with(tree, node_id, candidates, &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::PlannedActionType;

    #[test]
    fn parse_step_lines_rejects_malformed_empty_and_duplicate() {
        let text = "STEP: explore | look around\nnot a step\nSTEP: bad|\nSTEP: explore | look around\nSTEP: bash | run tests";
        let steps = parse_step_lines(text, 10);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].agent_type, "explore");
        assert_eq!(steps[1].agent_type, "bash");
    }

    #[test]
    fn parse_step_lines_truncates_long_prompts_and_caps_count() {
        let long = "a".repeat(600);
        let text = format!("STEP: general | {long}\nSTEP: general | two\nSTEP: general | three");
        let steps = parse_step_lines(&text, 2);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].prompt.len(), MAX_PROMPT_CHARS);
    }

    #[test]
    fn last_step_detection_recognizes_bash_and_test_keyword() {
        let bash_last = vec![ParsedStep { agent_type: "bash".into(), prompt: "run".into() }];
        assert!(last_step_is_test_or_bash(&bash_last));
        let test_prompt = vec![ParsedStep { agent_type: "general".into(), prompt: "run the test suite".into() }];
        assert!(last_step_is_test_or_bash(&test_prompt));
        let neither = vec![ParsedStep { agent_type: "general".into(), prompt: "write code".into() }];
        assert!(!last_step_is_test_or_bash(&neither));
    }

    #[test]
    fn fallback_recipe_classifies_by_keyword() {
        assert_eq!(fallback_recipe("fix the broken build")[0].agent_type, "explore");
        assert_eq!(fallback_recipe("refactor the module").len(), 3);
        assert_eq!(fallback_recipe("do something vague").len(), 1);
    }

    #[tokio::test]
    async fn build_tree_falls_back_without_an_llm_client() {
        let planner = TreePlanner::new(TreePlannerConfig::default());
        let tree = planner
            .build_tree(None, None, "implement the new feature", "ship it", 5)
            .await
            .unwrap();
        assert!(tree.total_nodes() > 1);
        assert!(!tree.best_path.is_empty());
    }

    #[tokio::test]
    async fn build_tree_appends_verify_when_last_step_is_not_test_or_bash() {
        let planner = TreePlanner::new(TreePlannerConfig::default());
        let tree = planner.build_tree(None, None, "implement a widget", "ship it", 5).await.unwrap();
        let root = tree.root();
        let last_child = root.children.last().copied().unwrap();
        assert_eq!(tree.node_index[&last_child].action.action_type, PlannedActionType::Verify);
    }
}
