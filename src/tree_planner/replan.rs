//! Replanning (§4.7 "Replanning"): react to a failed node by pruning its
//! subtree, down-weighting similar siblings, expanding alternatives from
//! the parent, and recomputing the best path.

use uuid::Uuid;

use crate::domain::plan::{PlanNode, PlanNodeStatus, PlanTree, PlannedActionType};
use crate::error::{OrchestratorError, OrchestratorResult};

use super::expansion::{alternative_candidates, expand_with};
use super::scoring::ScoreWeights;

/// Whether replanning may proceed: under the replan cap, and the failed
/// node isn't the tree root (root failure is unrecoverable by definition).
#[must_use]
pub fn can_replan(tree: &PlanTree, failed_node_id: Uuid, max_replans: u32) -> bool {
    if failed_node_id == tree.root_id {
        return false;
    }
    tree.replan_count < max_replans
}

/// Down-weight (`·0.8` on `success_prob`) every pending sibling sharing
/// `(action_type, agent_type)` with the failed node — they likely share
/// whatever caused the failure.
fn downweight_similar_siblings(tree: &mut PlanTree, failed_node_id: Uuid) {
    let Some(failed) = tree.node_index.get(&failed_node_id).cloned() else { return };
    let Some(parent_id) = failed.parent_id else { return };
    let Some(parent) = tree.node_index.get(&parent_id).cloned() else { return };
    for &sibling_id in &parent.children {
        if sibling_id == failed_node_id {
            continue;
        }
        if let Some(sibling) = tree.node_index.get_mut(&sibling_id) {
            if sibling.status == PlanNodeStatus::Pending
                && sibling.action.action_type == failed.action.action_type
                && sibling.action.agent_type == failed.action.agent_type
            {
                sibling.success_prob *= 0.8;
            }
        }
    }
}

/// Boost (`·1.2` on `score`, clamped to `1.0`) any newly-inserted child
/// whose tool name or agent type matches the reflection's suggested
/// alternative.
fn boost_matching_alternative(tree: &mut PlanTree, new_ids: &[Uuid], alternative: Option<&str>) {
    let Some(alternative) = alternative else { return };
    for &id in new_ids {
        if let Some(node) = tree.node_index.get_mut(&id) {
            let matches = node.action.tool_name.as_deref() == Some(alternative)
                || node.action.agent_type.as_deref() == Some(alternative);
            if matches {
                node.score = (node.score * 1.2).min(1.0);
            }
        }
    }
}

/// Prune the failed subtree, down-weight similar pending siblings, expand
/// alternative candidates from the parent, boost any matching the
/// reflection's alternative, and recompute the best path via `select`.
/// Rejects (without mutating) if replanning isn't allowed.
pub fn replan(
    tree: &mut PlanTree,
    failed_node_id: Uuid,
    alternative: Option<&str>,
    max_replans: u32,
    weights: &ScoreWeights,
    select: impl FnOnce(&PlanTree) -> Vec<Uuid>,
) -> OrchestratorResult<Vec<Uuid>> {
    if !can_replan(tree, failed_node_id, max_replans) {
        return Err(OrchestratorError::RootFailureNotReplannable);
    }
    let Some(parent_id) = tree.node_index.get(&failed_node_id).and_then(|n| n.parent_id) else {
        return Err(OrchestratorError::RootFailureNotReplannable);
    }

    tree.prune_subtree(failed_node_id);
    downweight_similar_siblings(tree, failed_node_id);

    let parent_node: PlanNode = tree.node_index[&parent_id].clone();
    let candidates = alternative_candidates(&parent_node);
    if candidates.is_empty() {
        return Err(OrchestratorError::MaxReplansExceeded(tree.replan_count));
    }
    let new_ids = expand_with(tree, parent_id, candidates, weights);
    boost_matching_alternative(tree, &new_ids, alternative);

    tree.replan_count += 1;
    let path = select(tree);
    tree.best_path = path.clone();
    Ok(path)
}
