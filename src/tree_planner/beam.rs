//! Beam search (§4.7, default algorithm): repeatedly expand the current
//! beam's children, drop `Pruned` nodes, and keep the top `beamWidth` by
//! score.

use uuid::Uuid;

use crate::domain::plan::{PlanNodeStatus, PlanTree};

/// Run beam search over `tree` starting from root, returning the best path
/// (root-to-leaf, inclusive) found within `max_depth` iterations.
///
/// Path score at equal totals prefers the shorter path (`sum / len`), so a
/// 2-step path beats a 4-step path with the same cumulative score.
#[must_use]
pub fn select_best_path(tree: &PlanTree, beam_width: usize, max_depth: u32) -> Vec<Uuid> {
    let mut beam: Vec<Vec<Uuid>> = vec![vec![tree.root_id]];

    for _ in 0..max_depth {
        let mut candidates: Vec<Vec<Uuid>> = Vec::new();
        for path in &beam {
            let Some(&leaf) = path.last() else { continue };
            let Some(node) = tree.node_index.get(&leaf) else { continue };
            if node.children.is_empty() {
                candidates.push(path.clone());
                continue;
            }
            for &child_id in &node.children {
                let Some(child) = tree.node_index.get(&child_id) else { continue };
                if child.status == PlanNodeStatus::Pruned {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(child_id);
                candidates.push(extended);
            }
        }
        if candidates.is_empty() {
            break;
        }
        candidates.sort_by(|a, b| {
            path_score(tree, b)
                .partial_cmp(&path_score(tree, a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(beam_width.max(1));
        beam = candidates;
    }

    beam.into_iter()
        .max_by(|a, b| {
            path_score(tree, a)
                .partial_cmp(&path_score(tree, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_else(|| vec![tree.root_id])
}

fn path_score(tree: &PlanTree, path: &[Uuid]) -> f64 {
    if path.is_empty() {
        return 0.0;
    }
    let sum: f64 = path.iter().filter_map(|id| tree.node_index.get(id)).map(|n| n.score).sum();
    sum / path.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::{PlanNode, PlannedAction};

    fn build_sample_tree() -> PlanTree {
        let mut root = PlanNode::root(PlannedAction::verify("root"));
        root.score = 0.5;
        let mut tree = PlanTree::new(root, "goal", 100);
        let root_id = tree.root_id;

        let mut high = PlanNode::child_of(tree.root(), PlannedAction::verify("high"));
        high.score = 0.9;
        let high_id = tree.insert_child(root_id, high).unwrap();

        let mut low = PlanNode::child_of(tree.root(), PlannedAction::verify("low"));
        low.score = 0.2;
        tree.insert_child(root_id, low).unwrap();

        let mut grandchild = PlanNode::child_of(&tree.node_index[&high_id].clone(), PlannedAction::verify("gc"));
        grandchild.score = 0.95;
        tree.insert_child(high_id, grandchild).unwrap();

        tree
    }

    #[test]
    fn prefers_the_higher_scoring_branch() {
        let tree = build_sample_tree();
        let path = select_best_path(&tree, 5, 3);
        assert!(path.len() >= 2);
        let second = tree.node_index.get(&path[1]).unwrap();
        assert!((second.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn pruned_children_are_excluded() {
        let mut tree = build_sample_tree();
        let root_id = tree.root_id;
        let high_child_id = tree.node_index[&root_id].children[0];
        tree.prune_subtree(high_child_id);
        let path = select_best_path(&tree, 5, 3);
        assert!(!path.contains(&high_child_id));
    }

    #[test]
    fn beam_width_of_one_is_greedy() {
        let tree = build_sample_tree();
        let path = select_best_path(&tree, 1, 3);
        assert!(!path.is_empty());
    }
}
