//! Plan tree data model: nodes, actions, and the tree itself.
//!
//! Parent↔child linkage follows Design Note 9: children hold ids only, a
//! single `node_index` map owned by the tree is the source of truth, and
//! parent pointers are derived, never stored redundantly. This gives the
//! tree sole ownership of every node — a node never outlives its tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of step a [`PlannedAction`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedActionType {
    ToolCall,
    Delegate,
    Verify,
    Decompose,
}

/// The concrete step a [`PlanNode`] represents once ready to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_type: PlannedActionType,
    pub tool_name: Option<String>,
    pub tool_args: Option<serde_json::Value>,
    pub agent_type: Option<String>,
    pub prompt: String,
    pub prerequisites: Vec<Uuid>,
}

impl PlannedAction {
    #[must_use]
    pub fn tool_call(tool_name: impl Into<String>, args: serde_json::Value, prompt: impl Into<String>) -> Self {
        Self {
            action_type: PlannedActionType::ToolCall,
            tool_name: Some(tool_name.into()),
            tool_args: Some(args),
            agent_type: None,
            prompt: prompt.into(),
            prerequisites: Vec::new(),
        }
    }

    #[must_use]
    pub fn delegate(agent_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            action_type: PlannedActionType::Delegate,
            tool_name: None,
            tool_args: None,
            agent_type: Some(agent_type.into()),
            prompt: prompt.into(),
            prerequisites: Vec::new(),
        }
    }

    #[must_use]
    pub fn verify(prompt: impl Into<String>) -> Self {
        Self {
            action_type: PlannedActionType::Verify,
            tool_name: None,
            tool_args: None,
            agent_type: None,
            prompt: prompt.into(),
            prerequisites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_prerequisite(mut self, node_id: Uuid) -> Self {
        self.prerequisites.push(node_id);
        self
    }
}

/// Lifecycle status of a [`PlanNode`]. Terminal iff `Succeeded`, `Failed`,
/// or `Pruned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanNodeStatus {
    Pending,
    Executing,
    Succeeded,
    Failed,
    Pruned,
}

impl PlanNodeStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Pruned)
    }
}

/// One node of a [`PlanTree`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub action: PlannedAction,
    pub status: PlanNodeStatus,
    pub score: f64,
    pub success_prob: f64,
    pub cost_estimate: f64,
    pub goal_progress: f64,
    pub visit_count: u32,
    pub total_reward: f64,
    pub depth: u32,
    pub result: Option<String>,
}

impl PlanNode {
    #[must_use]
    pub fn root(action: PlannedAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            children: Vec::new(),
            action,
            status: PlanNodeStatus::Pending,
            score: 0.0,
            success_prob: 0.5,
            cost_estimate: 0.5,
            goal_progress: 0.0,
            visit_count: 0,
            total_reward: 0.0,
            depth: 0,
            result: None,
        }
    }

    #[must_use]
    pub fn child_of(parent: &PlanNode, action: PlannedAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(parent.id),
            children: Vec::new(),
            action,
            status: PlanNodeStatus::Pending,
            score: 0.0,
            success_prob: 0.5,
            cost_estimate: 0.5,
            goal_progress: 0.0,
            visit_count: 0,
            total_reward: 0.0,
            depth: parent.depth + 1,
            result: None,
        }
    }

    /// `totalReward / visitCount` when `visitCount > 0`, else `0.0`.
    #[must_use]
    pub fn average_reward(&self) -> f64 {
        if self.visit_count == 0 {
            0.0
        } else {
            self.total_reward / f64::from(self.visit_count)
        }
    }
}

/// The full search tree: an indexed map of nodes plus the currently-best
/// path through them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTree {
    pub root_id: Uuid,
    pub node_index: HashMap<Uuid, PlanNode>,
    pub best_path: Vec<Uuid>,
    pub max_depth: u32,
    pub replan_count: u32,
    pub goal: String,
    max_nodes: usize,
}

impl PlanTree {
    #[must_use]
    pub fn new(root: PlanNode, goal: impl Into<String>, max_nodes: usize) -> Self {
        let root_id = root.id;
        let mut node_index = HashMap::new();
        node_index.insert(root_id, root);
        Self {
            root_id,
            node_index,
            best_path: vec![root_id],
            max_depth: 0,
            replan_count: 0,
            goal: goal.into(),
            max_nodes,
        }
    }

    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.node_index.len()
    }

    #[must_use]
    pub fn root(&self) -> &PlanNode {
        self.node_index.get(&self.root_id).expect("root always present")
    }

    /// Insert a node as a child of `parent_id`, respecting the configured
    /// node cap. Returns the new node's id.
    pub fn insert_child(&mut self, parent_id: Uuid, node: PlanNode) -> Result<Uuid, String> {
        if self.node_index.len() >= self.max_nodes {
            return Err(format!("plan tree node cap ({}) reached", self.max_nodes));
        }
        if !self.node_index.contains_key(&parent_id) {
            return Err(format!("parent node {parent_id} not found"));
        }
        let id = node.id;
        let depth = node.depth;
        self.node_index.insert(id, node);
        if let Some(parent) = self.node_index.get_mut(&parent_id) {
            parent.children.push(id);
        }
        self.max_depth = self.max_depth.max(depth);
        Ok(id)
    }

    /// Mark a node and its entire subtree `Pruned`. Pruning is transitive.
    pub fn prune_subtree(&mut self, node_id: Uuid) {
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node_index.get_mut(&id) {
                node.status = PlanNodeStatus::Pruned;
                stack.extend(node.children.clone());
            }
        }
    }

    /// All nodes whose action is ready to execute: `Pending` status, and
    /// every prerequisite `Succeeded` (or, absent prerequisites, the parent
    /// is `Succeeded` or `Executing` — root is always eligible).
    #[must_use]
    pub fn ready_actions(&self) -> Vec<Uuid> {
        self.node_index
            .values()
            .filter(|node| node.status == PlanNodeStatus::Pending)
            .filter(|node| self.is_ready(node))
            .map(|node| node.id)
            .collect()
    }

    fn is_ready(&self, node: &PlanNode) -> bool {
        if !node.action.prerequisites.is_empty() {
            return node.action.prerequisites.iter().all(|p| {
                self.node_index
                    .get(p)
                    .is_some_and(|n| n.status == PlanNodeStatus::Succeeded)
            });
        }
        match node.parent_id {
            None => true,
            Some(parent_id) => self.node_index.get(&parent_id).is_some_and(|parent| {
                matches!(
                    parent.status,
                    PlanNodeStatus::Succeeded | PlanNodeStatus::Executing
                )
            }),
        }
    }

    /// Record the outcome of executing `node_id`'s action: sets status and
    /// result, updates `goal_progress` if the node lies on `best_path`, and
    /// backpropagates reward (1.0 success / 0.0 failure) through ancestors'
    /// `visit_count`/`total_reward`.
    pub fn record_result(&mut self, node_id: Uuid, succeeded: bool, result: Option<String>, goal_progress: Option<f64>) {
        let on_best_path = self.best_path.contains(&node_id);
        if let Some(node) = self.node_index.get_mut(&node_id) {
            node.status = if succeeded {
                PlanNodeStatus::Succeeded
            } else {
                PlanNodeStatus::Failed
            };
            node.result = result;
            if on_best_path {
                if let Some(progress) = goal_progress {
                    node.goal_progress = progress.clamp(0.0, 1.0);
                }
            }
        }
        let reward = if succeeded { 1.0 } else { 0.0 };
        self.backpropagate(node_id, reward);
    }

    fn backpropagate(&mut self, from: Uuid, reward: f64) {
        let mut current = self.node_index.get(&from).and_then(|n| n.parent_id);
        while let Some(id) = current {
            let parent_id = if let Some(node) = self.node_index.get_mut(&id) {
                node.visit_count += 1;
                node.total_reward += reward;
                node.parent_id
            } else {
                None
            };
            current = parent_id;
        }
    }

    /// Every node reachable from root via `children` links — used to check
    /// `size(node_index) == total_nodes` against the bijection invariant in
    /// tests.
    #[must_use]
    pub fn reachable_from_root(&self) -> std::collections::HashSet<Uuid> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![self.root_id];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                if let Some(node) = self.node_index.get(&id) {
                    stack.extend(node.children.clone());
                }
            }
        }
        seen
    }

    /// Denormalize for checkpointing (§6): drop parent pointers, which are
    /// rebuilt from `children` on load, and split `result` into
    /// `result`/`error` by the node's terminal status.
    #[must_use]
    pub fn to_snapshot(&self) -> PlanTreeSnapshot {
        let nodes = self
            .node_index
            .iter()
            .map(|(id, node)| {
                let (result, error) = if node.status == PlanNodeStatus::Failed {
                    (None, node.result.clone())
                } else {
                    (node.result.clone(), None)
                };
                (
                    *id,
                    PlanNodeSnapshot {
                        id: node.id,
                        action: node.action.clone(),
                        status: node.status,
                        children: node.children.clone(),
                        result,
                        error,
                        confidence: node.success_prob,
                        score: node.score,
                        cost_estimate: node.cost_estimate,
                        goal_progress: node.goal_progress,
                        visit_count: node.visit_count,
                        total_reward: node.total_reward,
                        depth: node.depth,
                    },
                )
            })
            .collect();
        PlanTreeSnapshot {
            root_id: self.root_id,
            nodes,
            current_path: self.best_path.clone(),
            total_nodes: self.total_nodes(),
            goal: self.goal.clone(),
        }
    }
}

/// Denormalized checkpoint shape for a [`PlanTree`] (§6): node objects
/// carry only their children's ids, never a parent pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTreeSnapshot {
    pub root_id: Uuid,
    pub nodes: HashMap<Uuid, PlanNodeSnapshot>,
    pub current_path: Vec<Uuid>,
    pub total_nodes: usize,
    pub goal: String,
}

/// One node's denormalized shape within a [`PlanTreeSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNodeSnapshot {
    pub id: Uuid,
    pub action: PlannedAction,
    pub status: PlanNodeStatus,
    pub children: Vec<Uuid>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub confidence: f64,
    pub score: f64,
    pub cost_estimate: f64,
    pub goal_progress: f64,
    pub visit_count: u32,
    pub total_reward: f64,
    pub depth: u32,
}

impl PlanTreeSnapshot {
    /// Rebuild a live [`PlanTree`], deriving each node's `parent_id` from
    /// its parent's `children` list instead of storing it redundantly —
    /// "loading reconstructs parent pointers from the children arrays".
    #[must_use]
    pub fn into_tree(self, max_nodes: usize) -> PlanTree {
        let mut parent_of: HashMap<Uuid, Uuid> = HashMap::new();
        for (id, node) in &self.nodes {
            for &child_id in &node.children {
                parent_of.insert(child_id, *id);
            }
        }
        let mut node_index = HashMap::with_capacity(self.nodes.len());
        for (id, snap) in self.nodes {
            let result = snap.result.or(snap.error);
            node_index.insert(
                id,
                PlanNode {
                    id: snap.id,
                    parent_id: parent_of.get(&id).copied(),
                    children: snap.children,
                    action: snap.action,
                    status: snap.status,
                    score: snap.score,
                    success_prob: snap.confidence,
                    cost_estimate: snap.cost_estimate,
                    goal_progress: snap.goal_progress,
                    visit_count: snap.visit_count,
                    total_reward: snap.total_reward,
                    depth: snap.depth,
                    result,
                },
            );
        }
        let max_depth = node_index.values().map(|n| n.depth).max().unwrap_or(0);
        PlanTree {
            root_id: self.root_id,
            node_index,
            best_path: self.current_path,
            max_depth,
            replan_count: 0,
            goal: self.goal,
            max_nodes,
        }
    }
}
