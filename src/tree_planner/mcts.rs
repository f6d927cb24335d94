//! Monte Carlo Tree Search with UCB1 selection (§4.7).
//!
//! Grounded on the same "small weighted-sum struct, clamped arithmetic"
//! idiom as `priority_calculator.rs`: the rollout combines four named
//! terms (success prior, depth discount, goal-progress bonus, exploration
//! bonus) plus a bounded stochastic term, the way the teacher's deadline
//! score combines named boosts before clamping to `[0, 1]`.

use rand::Rng;
use uuid::Uuid;

use crate::domain::plan::PlanTree;

const EXPLORATION_CONSTANT: f64 = std::f64::consts::SQRT_2;
const DEPTH_DISCOUNT: f64 = 0.95;
const STOCHASTIC_RANGE: f64 = 0.025;

/// `avg + C·√(ln(N_parent) / n)`. A node with zero visits is given an
/// infinite UCB1 score so every child is tried at least once before any
/// child is revisited.
#[must_use]
pub fn ucb1(average_reward: f64, parent_visits: u32, node_visits: u32) -> f64 {
    if node_visits == 0 {
        return f64::INFINITY;
    }
    let exploration = EXPLORATION_CONSTANT * ((f64::from(parent_visits).max(1.0).ln()) / f64::from(node_visits)).sqrt();
    average_reward + exploration
}

/// The enhanced rollout estimate for a node at `depth` with the given
/// success prior and goal progress: `successProb · 0.95^depth +
/// progressBonus + explorationBonus ± 2.5%`, clamped to `[0, 1]`.
fn rollout_reward(success_prob: f64, goal_progress: f64, depth: u32, visit_count: u32, rng: &mut impl Rng) -> f64 {
    let discounted = success_prob * DEPTH_DISCOUNT.powi(depth as i32);
    let progress_bonus = 0.1 * goal_progress;
    let exploration_bonus = if visit_count < 3 { 0.05 } else { 0.0 };
    let stochastic = rng.gen_range(-STOCHASTIC_RANGE..=STOCHASTIC_RANGE);
    (discounted + progress_bonus + exploration_bonus + stochastic).clamp(0.0, 1.0)
}

/// Run `iterations` rounds of select → expand → simulate → backpropagate,
/// mutating `tree`'s node `visit_count`/`total_reward` fields in place.
/// Does not touch node `status`/`result` — those are only set by actually
/// executing an action and calling `PlanTree::record_result`.
pub fn run(tree: &mut PlanTree, iterations: u32, rng: &mut impl Rng) {
    for _ in 0..iterations {
        let leaf = select(tree, tree.root_id);
        simulate_and_backpropagate(tree, leaf, rng);
    }
}

/// Walk down from `from`, at each step choosing the unvisited child if one
/// exists, else the child with the highest UCB1 score, until a node with
/// no (non-pruned) children is reached.
fn select(tree: &PlanTree, from: Uuid) -> Uuid {
    let mut current = from;
    loop {
        let Some(node) = tree.node_index.get(&current) else { return current };
        let children: Vec<Uuid> = node
            .children
            .iter()
            .copied()
            .filter(|id| {
                tree.node_index
                    .get(id)
                    .is_some_and(|n| n.status != crate::domain::plan::PlanNodeStatus::Pruned)
            })
            .collect();
        if children.is_empty() {
            return current;
        }
        if let Some(unvisited) = children.iter().find(|id| tree.node_index[id].visit_count == 0) {
            return *unvisited;
        }
        let parent_visits = node.visit_count.max(1);
        current = *children
            .iter()
            .max_by(|a, b| {
                let na = &tree.node_index[*a];
                let nb = &tree.node_index[*b];
                ucb1(na.average_reward(), parent_visits, na.visit_count)
                    .partial_cmp(&ucb1(nb.average_reward(), parent_visits, nb.visit_count))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("children is non-empty");
    }
}

fn simulate_and_backpropagate(tree: &mut PlanTree, leaf: Uuid, rng: &mut impl Rng) {
    let Some(leaf_node) = tree.node_index.get(&leaf) else { return };
    let reward = rollout_reward(leaf_node.success_prob, leaf_node.goal_progress, leaf_node.depth, leaf_node.visit_count, rng);

    let mut current = Some(leaf);
    while let Some(id) = current {
        let Some(node) = tree.node_index.get_mut(&id) else { break };
        node.visit_count += 1;
        node.total_reward += reward;
        current = node.parent_id;
    }
}

/// After search, repeatedly descend to the child with the highest visit
/// count among non-pruned children, returning the resulting root-to-leaf
/// path.
#[must_use]
pub fn best_path(tree: &PlanTree) -> Vec<Uuid> {
    let mut path = vec![tree.root_id];
    let mut current = tree.root_id;
    loop {
        let Some(node) = tree.node_index.get(&current) else { break };
        let best_child = node
            .children
            .iter()
            .filter(|id| {
                tree.node_index
                    .get(id)
                    .is_some_and(|n| n.status != crate::domain::plan::PlanNodeStatus::Pruned)
            })
            .max_by_key(|id| tree.node_index[*id].visit_count);
        match best_child {
            Some(&child_id) => {
                path.push(child_id);
                current = child_id;
            }
            None => break,
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::{PlanNode, PlannedAction};
    use rand::SeedableRng;

    fn build_tree() -> PlanTree {
        let root = PlanNode::root(PlannedAction::verify("root"));
        let mut tree = PlanTree::new(root, "goal", 100);
        let root_id = tree.root_id;
        let mut strong = PlanNode::child_of(tree.root(), PlannedAction::verify("strong"));
        strong.success_prob = 0.95;
        tree.insert_child(root_id, strong).unwrap();
        let mut weak = PlanNode::child_of(tree.root(), PlannedAction::verify("weak"));
        weak.success_prob = 0.05;
        tree.insert_child(root_id, weak).unwrap();
        tree
    }

    #[test]
    fn ucb1_gives_unvisited_nodes_infinite_priority() {
        assert_eq!(ucb1(0.5, 10, 0), f64::INFINITY);
    }

    #[test]
    fn ucb1_favors_higher_average_reward_at_equal_visits() {
        assert!(ucb1(0.9, 10, 5) > ucb1(0.1, 10, 5));
    }

    #[test]
    fn search_concentrates_visits_on_the_higher_success_prior_child() {
        let mut tree = build_tree();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        run(&mut tree, 200, &mut rng);
        let root_id = tree.root_id;
        let children = tree.node_index[&root_id].children.clone();
        let visits: Vec<u32> = children.iter().map(|id| tree.node_index[id].visit_count).collect();
        assert!(visits[0] > visits[1]);
    }

    #[test]
    fn best_path_follows_highest_visit_count() {
        let mut tree = build_tree();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        run(&mut tree, 100, &mut rng);
        let path = best_path(&tree);
        assert_eq!(path.len(), 2);
        assert_eq!(path[0], tree.root_id);
    }
}
