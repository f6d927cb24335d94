//! Node expansion (§4.7 "Expansion kinds"): given a terminal node, propose
//! new children. Each kind has an LLM variant (when a client is
//! configured) and a deterministic fallback, mirroring the Router's
//! LLM-then-regex dispatch in [`crate::router`].

use uuid::Uuid;

use crate::domain::plan::{PlanNode, PlanNodeStatus, PlanTree, PlannedAction, PlannedActionType};
use crate::llm::LlmClient;
use crate::reflector::extract_json_from_response;

use super::scoring::{seed_priors, ScoreWeights};

/// Deterministic agent-type follow-up chain: explore → plan → execute →
/// verify. Given the last stage reached, returns the next one.
fn next_phase(agent_type: Option<&str>) -> &'static str {
    match agent_type {
        Some("explore") => "plan",
        Some("plan") => "general",
        _ => "general",
    }
}

/// From a `Failed` node: a retry-with-modification candidate, a candidate
/// built from the reflection's suggested alternative tool (if any), and a
/// general fallback.
#[must_use]
pub fn recovery_actions(node: &PlanNode, alternative_tool: Option<&str>) -> Vec<PlannedAction> {
    let mut actions = Vec::new();
    match node.action.action_type {
        PlannedActionType::ToolCall => {
            if let Some(tool) = &node.action.tool_name {
                actions.push(PlannedAction::tool_call(
                    tool.clone(),
                    node.action.tool_args.clone().unwrap_or(serde_json::Value::Null),
                    format!("retry: {}", node.action.prompt),
                ));
            }
        }
        _ => {
            actions.push(PlannedAction::delegate("general", format!("retry: {}", node.action.prompt)));
        }
    }
    if let Some(tool) = alternative_tool {
        actions.push(PlannedAction::tool_call(
            tool,
            serde_json::Value::Null,
            format!("try {tool} instead: {}", node.action.prompt),
        ));
    }
    actions.push(PlannedAction::delegate("general", format!("recover and continue: {}", node.action.prompt)));
    actions
}

/// From a `Succeeded` node: a follow-up for the next phase, or a `Verify`
/// step if the node's `goal_progress` already reached 1.0.
#[must_use]
pub fn follow_up_actions(node: &PlanNode) -> Vec<PlannedAction> {
    if node.goal_progress >= 1.0 {
        return vec![PlannedAction::verify(format!("verify: {}", node.action.prompt))];
    }
    let next = next_phase(node.action.agent_type.as_deref());
    vec![PlannedAction::delegate(next, format!("continue from: {}", node.action.prompt))]
}

/// From any other node: alternative agent-type candidates.
#[must_use]
pub fn alternative_candidates(node: &PlanNode) -> Vec<PlannedAction> {
    ["explore", "general", "bash"]
        .into_iter()
        .filter(|candidate| Some(*candidate) != node.action.agent_type.as_deref())
        .map(|candidate| PlannedAction::delegate(candidate, format!("alternative approach: {}", node.action.prompt)))
        .collect()
}

#[derive(Debug, serde::Deserialize)]
struct LlmExpansionResponse {
    steps: Vec<LlmExpansionStep>,
}

#[derive(Debug, serde::Deserialize)]
struct LlmExpansionStep {
    agent_type: String,
    prompt: String,
}

/// Ask the model for expansion candidates phrased for `kind`; on any
/// failure (transport error, malformed JSON, empty list) the caller should
/// fall back to the deterministic variant above.
pub async fn llm_expand(llm: &dyn LlmClient, node: &PlanNode, kind: &str) -> Option<Vec<PlannedAction>> {
    let prompt = format!(
        "Propose up to 3 next steps ({kind}) for a plan node with prompt \"{}\". \
         Respond as strict JSON: {{\"steps\": [{{\"agent_type\": \"...\", \"prompt\": \"...\"}}]}}",
        node.action.prompt
    );
    let mut stream = llm.send_message(&prompt).await.ok()?;
    let collected = stream.collect().await.ok()?;
    let json = extract_json_from_response(&collected.text)?;
    let parsed: LlmExpansionResponse = serde_json::from_value(json).ok()?;
    if parsed.steps.is_empty() {
        return None;
    }
    Some(
        parsed
            .steps
            .into_iter()
            .map(|step| PlannedAction::delegate(step.agent_type, step.prompt))
            .collect(),
    )
}

/// Insert `actions` as children of `parent_id`, seeding each child's
/// priors and score. Returns the ids of the inserted nodes.
pub fn expand_with(tree: &mut PlanTree, parent_id: Uuid, actions: Vec<PlannedAction>, weights: &ScoreWeights) -> Vec<Uuid> {
    let Some(parent) = tree.node_index.get(&parent_id).cloned() else { return Vec::new() };
    let mut inserted = Vec::new();
    for action in actions {
        let (success_prob, cost_estimate, goal_progress) = seed_priors(&action);
        let mut child = PlanNode::child_of(&parent, action);
        child.success_prob = success_prob;
        child.cost_estimate = cost_estimate;
        child.goal_progress = goal_progress;
        child.score = weights.score(success_prob, cost_estimate, goal_progress, child.depth);
        if let Ok(id) = tree.insert_child(parent_id, child) {
            inserted.push(id);
        }
    }
    inserted
}

/// Dispatch expansion by the node's terminal status, producing the
/// deterministic candidate set for `node`. `alternative_tool` is the
/// reflection's suggested alternative when expanding a `Failed` node.
#[must_use]
pub fn expansion_candidates(node: &PlanNode, alternative_tool: Option<&str>) -> Vec<PlannedAction> {
    match node.status {
        PlanNodeStatus::Failed => recovery_actions(node, alternative_tool),
        PlanNodeStatus::Succeeded => follow_up_actions(node),
        _ => alternative_candidates(node),
    }
}
