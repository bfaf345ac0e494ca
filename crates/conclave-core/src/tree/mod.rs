//! Arena-allocated search tree.
//!
//! Nodes are stored in a contiguous vector and referenced by [`NodeId`].
//! Children own nothing of their parent; the parent link is an index used
//! only to walk upward during backpropagation.

mod node;

pub use node::{ActionId, NodeId, TreeNode};

use serde::{Deserialize, Serialize};

use crate::domain::{Action, State};
use crate::types::{AgentId, EvaluationResult, EvaluationSample};

/// Aggregate shape of a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeStatistics {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: usize,
    pub root_visits: u32,
}

/// Search tree owning every node reachable from the root.
#[derive(Debug)]
pub struct Tree<S: State> {
    nodes: Vec<TreeNode<S>>,
}

impl<S: State> Tree<S> {
    /// Create a tree whose root holds `root_state`.
    pub fn new(root_state: S) -> Self {
        Self {
            nodes: vec![TreeNode::root(root_state)],
        }
    }

    pub fn root_id(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn root(&self) -> &TreeNode<S> {
        self.get(NodeId::ROOT)
    }

    /// Get a node by id.
    ///
    /// # Panics
    /// Panics if the id does not belong to this tree.
    pub fn get(&self, id: NodeId) -> &TreeNode<S> {
        &self.nodes[id.0]
    }

    /// Get a mutable node by id.
    ///
    /// # Panics
    /// Panics if the id does not belong to this tree.
    pub fn get_mut(&mut self, id: NodeId) -> &mut TreeNode<S> {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists for the tree's whole lifetime.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create the child of `parent` reached through `action`.
    ///
    /// If that action was already expanded the existing child is returned.
    /// `action` must be one of the parent state's valid actions.
    pub fn expand(&mut self, parent: NodeId, action: S::Action) -> NodeId {
        let action_id = action.id();
        if let Some(existing) = self.get(parent).child(&action_id) {
            return existing;
        }

        let parent_node = self.get(parent);
        let state = parent_node.state().apply_action(&action);
        let depth = parent_node.depth() + 1;

        let id = NodeId(self.nodes.len());
        self.nodes
            .push(TreeNode::new(state, Some(action), Some(parent), depth));
        self.get_mut(parent).push_child(action_id, id);
        id
    }

    /// Store an evaluation on a node.
    pub fn record_evaluation(&mut self, id: NodeId, evaluation: EvaluationResult) {
        self.get_mut(id).record_evaluation(evaluation);
    }

    /// UCB1 value of a node relative to its parent's visit count.
    ///
    /// The root has no parent and is scored against its own visits.
    pub fn ucb1(&self, id: NodeId, exploration: f64) -> f64 {
        let node = self.get(id);
        let parent_visits = node
            .parent()
            .map(|p| self.get(p).visits())
            .unwrap_or_else(|| node.visits());
        node.ucb1(parent_visits, exploration)
    }

    /// Child with the highest UCB1 value; ties go to the earliest expanded.
    pub fn select_child(&self, id: NodeId, exploration: f64) -> Option<NodeId> {
        let parent = self.get(id);
        let mut best: Option<(NodeId, f64)> = None;

        for (_, child_id) in parent.children() {
            let value = self.get(*child_id).ucb1(parent.visits(), exploration);
            match best {
                Some((_, best_value)) if value <= best_value => {}
                _ => best = Some((*child_id, value)),
            }
        }

        best.map(|(child, _)| child)
    }

    /// Child with the highest average reward; ties go to the earliest expanded.
    pub fn best_child(&self, id: NodeId) -> Option<NodeId> {
        let mut best: Option<(NodeId, f64)> = None;

        for (_, child_id) in self.get(id).children() {
            let reward = self.get(*child_id).average_reward();
            match best {
                Some((_, best_reward)) if reward <= best_reward => {}
                _ => best = Some((*child_id, reward)),
            }
        }

        best.map(|(child, _)| child)
    }

    /// Child with the most visits.
    ///
    /// Ties are broken by average reward, then by expansion order. This is
    /// the criterion for the final recommendation.
    pub fn most_visited_child(&self, id: NodeId) -> Option<NodeId> {
        let mut best: Option<(NodeId, u32, f64)> = None;

        for (_, child_id) in self.get(id).children() {
            let child = self.get(*child_id);
            let (visits, reward) = (child.visits(), child.average_reward());
            let better = match best {
                None => true,
                Some((_, best_visits, best_reward)) => {
                    visits > best_visits || (visits == best_visits && reward > best_reward)
                }
            };
            if better {
                best = Some((*child_id, visits, reward));
            }
        }

        best.map(|(child, _, _)| child)
    }

    /// Actions along the most-visited path from `id` down to a leaf.
    pub fn principal_variation(&self, id: NodeId) -> Vec<S::Action> {
        let mut actions = Vec::new();
        let mut current = id;

        while let Some(child) = self.most_visited_child(current) {
            if let Some(action) = self.get(child).action() {
                actions.push(action.clone());
            }
            current = child;
        }

        actions
    }

    /// Confidence that `child` is the right move from `parent`.
    ///
    /// `clamp(visit_share * (avg_reward + 1) / 2, 0, 1)`, or 0 when the
    /// parent has never been visited.
    pub fn move_confidence(&self, parent: NodeId, child: NodeId) -> f64 {
        let parent_visits = self.get(parent).visits();
        if parent_visits == 0 {
            return 0.0;
        }
        let child = self.get(child);
        let share = f64::from(child.visits()) / f64::from(parent_visits);
        (share * (child.average_reward() + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    /// Apply `update(reward, agent)` from `id` up to and including the root.
    pub fn backpropagate(&mut self, id: NodeId, reward: f64, agent_id: &AgentId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get_mut(node_id);
            node.update(reward, agent_id);
            current = node.parent();
        }
    }

    /// Ids of every node in the subtree rooted at `id`, in creation order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut stack = vec![id];

        while let Some(node_id) = stack.pop() {
            ids.push(node_id);
            stack.extend(self.get(node_id).children().iter().map(|(_, child)| *child));
        }

        ids.sort();
        ids
    }

    /// Every evaluation recorded in the subtree rooted at `id`.
    pub fn evaluation_history(&self, id: NodeId) -> Vec<EvaluationSample> {
        self.subtree(id)
            .into_iter()
            .flat_map(|node_id| {
                let node = self.get(node_id);
                node.evaluations()
                    .values()
                    .map(move |eval| EvaluationSample::new(eval.clone(), node.depth()))
            })
            .collect()
    }

    /// Every evaluation recorded anywhere in the tree.
    pub fn all_evaluations(&self) -> Vec<EvaluationResult> {
        self.nodes
            .iter()
            .flat_map(|node| node.evaluations().values().cloned())
            .collect()
    }

    pub fn statistics(&self) -> TreeStatistics {
        TreeStatistics {
            node_count: self.nodes.len(),
            leaf_count: self.nodes.iter().filter(|n| n.is_leaf()).count(),
            max_depth: self.nodes.iter().map(|n| n.depth()).max().unwrap_or(0),
            root_visits: self.root().visits(),
        }
    }
}
