//! Search tree nodes.
//!
//! Nodes live in the [`Tree`](super::Tree) arena and refer to each other by
//! [`NodeId`]. The parent link is a plain index, used only to walk upward.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::domain::{Action, State};
use crate::types::{AgentId, EvaluationResult};

/// Index into the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The root node is always at index 0.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Identifier type of the actions available from states of type `S`.
pub type ActionId<S> = <<S as State>::Action as Action>::Id;

/// A node in the search tree.
///
/// Holds the state snapshot reached by applying `action` to the parent's
/// state, plus the statistics accumulated by backpropagation.
#[derive(Debug)]
pub struct TreeNode<S: State> {
    state: S,
    action: Option<S::Action>,
    parent: Option<NodeId>,
    children: Vec<(ActionId<S>, NodeId)>,
    visits: u32,
    cumulative_reward: f64,
    valid_actions: OnceLock<Vec<S::Action>>,
    evaluations: BTreeMap<AgentId, EvaluationResult>,
    agent_updates: BTreeMap<AgentId, u32>,
    depth: usize,
}

impl<S: State> TreeNode<S> {
    pub(crate) fn root(state: S) -> Self {
        Self::new(state, None, None, 0)
    }

    pub(crate) fn new(
        state: S,
        action: Option<S::Action>,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Self {
        Self {
            state,
            action,
            parent,
            children: Vec::new(),
            visits: 0,
            cumulative_reward: 0.0,
            valid_actions: OnceLock::new(),
            evaluations: BTreeMap::new(),
            agent_updates: BTreeMap::new(),
            depth,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Action that produced this node (`None` for the root).
    pub fn action(&self) -> Option<&S::Action> {
        self.action.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn visits(&self) -> u32 {
        self.visits
    }

    pub fn cumulative_reward(&self) -> f64 {
        self.cumulative_reward
    }

    /// Mean backpropagated reward. Unvisited nodes report 0.
    pub fn average_reward(&self) -> f64 {
        self.cumulative_reward / self.visits.max(1) as f64
    }

    /// Children in expansion order.
    pub fn children(&self) -> &[(ActionId<S>, NodeId)] {
        &self.children
    }

    /// Child reached through the action with the given id.
    pub fn child(&self, action_id: &ActionId<S>) -> Option<NodeId> {
        self.children
            .iter()
            .find(|(id, _)| id == action_id)
            .map(|(_, child)| *child)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The state's valid actions, one per id, computed on first use.
    fn valid_actions(&self) -> &[S::Action] {
        self.valid_actions.get_or_init(|| {
            let mut seen = BTreeSet::new();
            self.state
                .valid_actions()
                .into_iter()
                .filter(|action| seen.insert(action.id()))
                .collect()
        })
    }

    /// Valid actions that have not been expanded yet.
    pub fn unexplored_actions(&self) -> Vec<S::Action> {
        let expanded: BTreeSet<&ActionId<S>> = self.children.iter().map(|(id, _)| id).collect();
        self.valid_actions()
            .iter()
            .filter(|action| !expanded.contains(&action.id()))
            .cloned()
            .collect()
    }

    /// Whether every valid action already has a child.
    ///
    /// Children are only ever expanded from valid actions, so counting them
    /// is enough.
    pub fn is_fully_expanded(&self) -> bool {
        self.children.len() >= self.valid_actions().len()
    }

    /// UCB1 value given the parent's visit count.
    ///
    /// `avg + c * sqrt(ln(N_parent) / N)`; unvisited nodes return `+inf` so
    /// every child is tried once before the comparison means anything.
    pub fn ucb1(&self, parent_visits: u32, exploration: f64) -> f64 {
        if self.visits == 0 {
            return f64::INFINITY;
        }
        let parent = f64::from(parent_visits.max(1));
        self.average_reward() + exploration * (parent.ln() / f64::from(self.visits)).sqrt()
    }

    /// Record one backpropagated reward.
    ///
    /// The agent id is kept for statistics only and never weights the reward.
    pub fn update(&mut self, reward: f64, agent_id: &AgentId) {
        self.visits += 1;
        self.cumulative_reward += reward;
        *self.agent_updates.entry(agent_id.clone()).or_insert(0) += 1;
    }

    /// Latest evaluation per agent.
    pub fn evaluations(&self) -> &BTreeMap<AgentId, EvaluationResult> {
        &self.evaluations
    }

    /// Number of backpropagated updates attributed to each agent.
    pub fn agent_updates(&self) -> &BTreeMap<AgentId, u32> {
        &self.agent_updates
    }

    /// Store an agent's evaluation, replacing its previous one.
    pub fn record_evaluation(&mut self, evaluation: EvaluationResult) {
        self.evaluations.insert(evaluation.agent_id.clone(), evaluation);
    }

    pub(crate) fn push_child(&mut self, action_id: ActionId<S>, child: NodeId) {
        self.children.push((action_id, child));
    }
}
