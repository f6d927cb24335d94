//! A* search (§4.7): an alternative to beam/MCTS selectable via
//! `PlannerAlgorithm::AStar`, trading the others' breadth for a single
//! best-first path guided by an admissible-ish cost+heuristic estimate.
//!
//! Grounded on the same scoring idiom as [`super::scoring`]: `f = g·(1 −
//! depthRemaining) + h·(1 − successProb − 0.5·goalProgress + 0.1·
//! depthRemaining)`, with the frontier kept as a plain sorted `Vec` rather
//! than a `BinaryHeap` since plan trees stay small enough (≤ `maxNodes`)
//! that the simplicity is worth more than the asymptotics here.

use std::collections::HashMap;

use uuid::Uuid;

use crate::domain::plan::{PlanNodeStatus, PlanTree};

/// A frontier entry: the node to expand from, its path-so-far, and its
/// computed f-score.
struct Frontier {
    node_id: Uuid,
    path: Vec<Uuid>,
    f_score: f64,
}

/// `f(node) = g·(1 − depthRemaining) + h·(1 − successProb − 0.5·
/// goalProgress + 0.1·depthRemaining)`, where `depthRemaining` is
/// normalized to `[0, 1]` by `max_depth` and `g` is the node's
/// `cost_estimate`.
fn f_score(cost_estimate: f64, success_prob: f64, goal_progress: f64, depth: u32, max_depth: u32) -> f64 {
    let depth_remaining = if max_depth == 0 {
        0.0
    } else {
        1.0 - (f64::from(depth) / f64::from(max_depth)).clamp(0.0, 1.0)
    };
    let g = cost_estimate * (1.0 - depth_remaining);
    let h = 1.0 - success_prob - 0.5 * goal_progress + 0.1 * depth_remaining;
    g + h
}

/// A node counts as a search goal if it is a `Succeeded` verify step, a
/// `Succeeded` leaf with `goal_progress >= 0.9`, or any node whose
/// `goal_progress >= 1.0`.
fn is_goal(tree: &PlanTree, node_id: Uuid) -> bool {
    let Some(node) = tree.node_index.get(&node_id) else { return false };
    if node.goal_progress >= 1.0 {
        return true;
    }
    if node.status != PlanNodeStatus::Succeeded {
        return false;
    }
    use crate::domain::plan::PlannedActionType;
    if node.action.action_type == PlannedActionType::Verify {
        return true;
    }
    node.children.is_empty() && node.goal_progress >= 0.9
}

/// Best-first search from root toward the first goal node found, falling
/// back to the highest-scoring path explored if no goal is reached before
/// the frontier is exhausted.
#[must_use]
pub fn select_best_path(tree: &PlanTree) -> Vec<Uuid> {
    let mut frontier: Vec<Frontier> = vec![Frontier {
        node_id: tree.root_id,
        path: vec![tree.root_id],
        f_score: 0.0,
    }];
    let mut best_seen: Option<(f64, Vec<Uuid>)> = None;
    let mut visited: HashMap<Uuid, ()> = HashMap::new();

    while !frontier.is_empty() {
        frontier.sort_by(|a, b| a.f_score.partial_cmp(&b.f_score).unwrap_or(std::cmp::Ordering::Equal));
        let current = frontier.remove(0);
        if visited.insert(current.node_id, ()).is_some() {
            continue;
        }

        if is_goal(tree, current.node_id) {
            return current.path;
        }

        let path_score = current.path.len() as f64 - current.f_score;
        if best_seen.as_ref().is_none_or(|(score, _)| path_score > *score) {
            best_seen = Some((path_score, current.path.clone()));
        }

        let Some(node) = tree.node_index.get(&current.node_id) else { continue };
        for &child_id in &node.children {
            let Some(child) = tree.node_index.get(&child_id) else { continue };
            if child.status == PlanNodeStatus::Pruned || visited.contains_key(&child_id) {
                continue;
            }
            let mut path = current.path.clone();
            path.push(child_id);
            frontier.push(Frontier {
                node_id: child_id,
                f_score: f_score(child.cost_estimate, child.success_prob, child.goal_progress, child.depth, tree.max_depth.max(1)),
                path,
            });
        }
    }

    best_seen.map(|(_, path)| path).unwrap_or_else(|| vec![tree.root_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::{PlanNode, PlannedAction};

    #[test]
    fn finds_a_verify_goal_through_intermediate_steps() {
        let root = PlanNode::root(PlannedAction::verify("root"));
        let mut tree = PlanTree::new(root, "goal", 100);
        let root_id = tree.root_id;

        let mut step = PlanNode::child_of(tree.root(), PlannedAction::tool_call("edit", serde_json::json!({}), "edit"));
        step.status = PlanNodeStatus::Succeeded;
        step.success_prob = 0.9;
        let step_id = tree.insert_child(root_id, step).unwrap();

        let mut verify = PlanNode::child_of(&tree.node_index[&step_id].clone(), PlannedAction::verify("verify"));
        verify.status = PlanNodeStatus::Succeeded;
        verify.success_prob = 0.95;
        let verify_id = tree.insert_child(step_id, verify).unwrap();

        let path = select_best_path(&tree);
        assert_eq!(path.last().copied(), Some(verify_id));
    }

    #[test]
    fn goal_progress_at_full_marks_a_node_as_goal_regardless_of_status() {
        let root = PlanNode::root(PlannedAction::verify("root"));
        let mut tree = PlanTree::new(root, "goal", 100);
        assert!(!is_goal(&tree, tree.root_id));
        tree.node_index.get_mut(&tree.root_id).unwrap().goal_progress = 1.0;
        assert!(is_goal(&tree, tree.root_id));
    }

    #[test]
    fn falls_back_to_best_partial_path_when_no_goal_exists() {
        let root = PlanNode::root(PlannedAction::tool_call("read", serde_json::json!({}), "read"));
        let mut tree = PlanTree::new(root, "goal", 100);
        let root_id = tree.root_id;
        let leaf = PlanNode::child_of(tree.root(), PlannedAction::tool_call("read", serde_json::json!({}), "read again"));
        tree.insert_child(root_id, leaf).unwrap();
        let path = select_best_path(&tree);
        assert!(path.len() >= 1);
        assert_eq!(path[0], tree.root_id);
    }

    #[test]
    fn pruned_branches_are_never_selected() {
        let root = PlanNode::root(PlannedAction::verify("root"));
        let mut tree = PlanTree::new(root, "goal", 100);
        let root_id = tree.root_id;
        let mut pruned = PlanNode::child_of(tree.root(), PlannedAction::verify("dead end"));
        pruned.goal_progress = 1.0;
        let pruned_id = tree.insert_child(root_id, pruned).unwrap();
        tree.prune_subtree(pruned_id);
        let path = select_best_path(&tree);
        assert!(!path.contains(&pruned_id));
    }
}
