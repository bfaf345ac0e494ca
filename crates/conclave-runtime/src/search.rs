//! Multi-agent Monte Carlo Tree Search.
//!
//! Each iteration runs four phases:
//! - Selection: UCB1 descent to a node that still has unexplored actions
//! - Expansion: one or more new children (progressive widening)
//! - Simulation: a selected agent evaluates each new child
//! - Backpropagation: the score flows up to the root
//!
//! A failed evaluation never aborts the search. It is logged, recorded in
//! the result's failure log and scored as zero.

use futures::future::join_all;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use conclave_core::{
    AgentId, AgentSelector, EvaluationResult, NodeId, SelectionContext, SelectorError, State,
    Tree,
};

use crate::agents::Agent;
use crate::config::SearchConfig;

/// Errors that end a search.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("No ready agents available")]
    NoAgentsAvailable,

    #[error("Root has no expanded child to recommend")]
    NoExpandableChild,

    #[error("Agent selection failed: {0}")]
    Selector(#[from] SelectorError),

    #[error("Search execution failed: {0}")]
    ExecutionFailed(String),
}

/// Lifecycle of one search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Initializing,
    Iterating,
    TimeExceeded,
    EarlyTerminated,
    Exhausted,
    Finalizing,
    Done,
}

/// Why the iteration loop stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The iteration budget ran out
    #[default]
    Exhausted,

    /// The time limit passed
    TimeExceeded,

    /// The leading move was clear enough to stop
    EarlyTerminated,
}

impl From<TerminationReason> for SearchPhase {
    fn from(reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::Exhausted => SearchPhase::Exhausted,
            TerminationReason::TimeExceeded => SearchPhase::TimeExceeded,
            TerminationReason::EarlyTerminated => SearchPhase::EarlyTerminated,
        }
    }
}

/// Time spent in each phase, summed over all iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub selection: Duration,
    pub expansion: Duration,
    pub simulation: Duration,
    pub backpropagation: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStatistics {
    pub iterations: usize,

    /// Evaluations attempted, failed ones included
    pub simulations: usize,

    pub failed_evaluations: usize,

    /// Nodes added to the tree by this call
    pub nodes_created: usize,

    pub max_depth: usize,

    /// Simulations run by each agent
    pub agent_usage: BTreeMap<AgentId, usize>,

    pub termination: TerminationReason,

    pub timings: PhaseTimings,
}

/// One evaluation that did not produce a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub agent_id: AgentId,

    /// Iteration (0-based) in which the call failed
    pub iteration: usize,

    /// Depth of the node being evaluated
    pub depth: usize,

    pub error: String,
}

/// Outcome of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult<A> {
    /// Action leading to the root's most visited child
    pub best_action: A,

    /// Average reward of that child
    pub best_score: f64,

    /// Move confidence of that child (0.0 - 1.0)
    pub confidence: f64,

    /// Every evaluation recorded in the tree
    pub evaluations: Vec<EvaluationResult>,

    /// Most-visited line of play from the root
    pub principal_variation: Vec<A>,

    pub failures: Vec<EvaluationFailure>,

    pub statistics: SearchStatistics,
}

/// Number of actions progressive widening expands at a node.
///
/// `min(ceil(sqrt(visits + 1)), unexplored)`
pub fn expansion_width(visits: u32, unexplored: usize) -> usize {
    let width = (f64::from(visits) + 1.0).sqrt().ceil() as usize;
    width.min(unexplored)
}

/// Runs MCTS over a tree with a pool of agents.
#[derive(Debug, Clone, Default)]
pub struct SearchAlgorithm {
    config: SearchConfig,
}

/// Mutable bookkeeping of one call.
struct Run {
    rng: ChaCha8Rng,
    statistics: SearchStatistics,
    failures: Vec<EvaluationFailure>,
}

impl SearchAlgorithm {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search from the tree's root and recommend an action.
    ///
    /// The tree keeps everything the search built, so callers can inspect
    /// or audit it afterwards. Statistics cover this call only.
    pub async fn search<S: State>(
        &self,
        tree: &mut Tree<S>,
        agents: &[Arc<dyn Agent<S>>],
        selector: &mut AgentSelector,
    ) -> Result<SearchResult<S::Action>, SearchError> {
        let started = Instant::now();
        let mut phase = SearchPhase::Initializing;
        tracing::debug!(phase = ?phase, agents = agents.len(), "Search starting");

        self.config
            .validate()
            .map_err(|e| SearchError::ExecutionFailed(e.to_string()))?;

        let pool = ready_agents(agents).await;
        if pool.is_empty() {
            tracing::warn!(registered = agents.len(), "No ready agents");
            return Err(SearchError::NoAgentsAvailable);
        }
        let ids: Vec<AgentId> = pool.iter().map(|agent| agent.id().clone()).collect();

        let nodes_before = tree.len();
        let deadline = self.config.time_limit.map(|limit| started + limit);
        let mut run = Run {
            rng: self.rng(),
            statistics: SearchStatistics::default(),
            failures: Vec::new(),
        };

        transition(&mut phase, SearchPhase::Iterating);
        let termination = loop {
            if run.statistics.iterations >= self.config.max_iterations {
                break TerminationReason::Exhausted;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break TerminationReason::TimeExceeded;
            }

            self.iterate(tree, &pool, &ids, selector, &mut run).await?;
            run.statistics.iterations += 1;

            if self.should_stop_early(tree, run.statistics.iterations) {
                break TerminationReason::EarlyTerminated;
            }
        };
        transition(&mut phase, termination.into());

        transition(&mut phase, SearchPhase::Finalizing);
        let Run {
            mut statistics,
            failures,
            ..
        } = run;
        statistics.termination = termination;
        statistics.nodes_created = tree.len() - nodes_before;
        statistics.max_depth = tree.statistics().max_depth;
        statistics.timings.total = started.elapsed();

        let root = tree.root_id();
        let best = tree
            .most_visited_child(root)
            .ok_or(SearchError::NoExpandableChild)?;
        let best_node = tree.get(best);
        let best_action = best_node
            .action()
            .cloned()
            .ok_or(SearchError::NoExpandableChild)?;

        let result = SearchResult {
            best_action,
            best_score: best_node.average_reward(),
            confidence: tree.move_confidence(root, best),
            evaluations: tree.all_evaluations(),
            principal_variation: tree.principal_variation(root),
            failures,
            statistics,
        };

        transition(&mut phase, SearchPhase::Done);
        tracing::info!(
            iterations = result.statistics.iterations,
            simulations = result.statistics.simulations,
            failed = result.statistics.failed_evaluations,
            termination = ?result.statistics.termination,
            best_score = result.best_score,
            confidence = result.confidence,
            elapsed = ?result.statistics.timings.total,
            "Search complete"
        );

        Ok(result)
    }

    /// One selection / expansion / simulation / backpropagation pass.
    async fn iterate<S: State>(
        &self,
        tree: &mut Tree<S>,
        pool: &[Arc<dyn Agent<S>>],
        ids: &[AgentId],
        selector: &mut AgentSelector,
        run: &mut Run,
    ) -> Result<(), SearchError> {
        let phase_start = Instant::now();
        let leaf = self.select(tree);
        run.statistics.timings.selection += phase_start.elapsed();

        let phase_start = Instant::now();
        let expanded = self.expand(tree, leaf, &mut run.rng);
        run.statistics.timings.expansion += phase_start.elapsed();

        tracing::debug!(
            iteration = run.statistics.iterations,
            leaf = leaf.index(),
            expanded = expanded.len(),
            "Iteration"
        );

        for node_id in expanded {
            let phase_start = Instant::now();
            let node = tree.get(node_id);
            let depth = node.depth();
            let index = selector.select(ids, SelectionContext::new(depth, node.evaluations()))?;
            let agent = &pool[index];

            let outcome = agent.evaluate(node.state()).await;
            let reward = match outcome {
                Ok(evaluation) => {
                    let score = evaluation.score;
                    tree.record_evaluation(node_id, evaluation);
                    score
                }
                Err(e) => {
                    tracing::warn!(
                        agent = %agent.id(),
                        depth,
                        error = %e,
                        "Agent evaluation failed, scoring as 0"
                    );
                    run.statistics.failed_evaluations += 1;
                    run.failures.push(EvaluationFailure {
                        agent_id: agent.id().clone(),
                        iteration: run.statistics.iterations,
                        depth,
                        error: e.to_string(),
                    });
                    0.0
                }
            };
            run.statistics.simulations += 1;
            *run
                .statistics
                .agent_usage
                .entry(agent.id().clone())
                .or_insert(0) += 1;
            run.statistics.timings.simulation += phase_start.elapsed();

            let phase_start = Instant::now();
            tree.backpropagate(node_id, reward, agent.id());
            run.statistics.timings.backpropagation += phase_start.elapsed();
        }

        Ok(())
    }

    /// Descend by UCB1 while the current node is fully expanded.
    fn select<S: State>(&self, tree: &Tree<S>) -> NodeId {
        let mut current = tree.root_id();
        loop {
            let node = tree.get(current);
            if node.is_leaf() || !node.is_fully_expanded() {
                return current;
            }
            match tree.select_child(current, self.config.exploration_constant) {
                Some(child) => current = child,
                None => return current,
            }
        }
    }

    /// Nodes to simulate this iteration.
    ///
    /// Terminal or action-less nodes are simulated themselves.
    fn expand<S: State>(
        &self,
        tree: &mut Tree<S>,
        leaf: NodeId,
        rng: &mut ChaCha8Rng,
    ) -> Vec<NodeId> {
        let node = tree.get(leaf);
        if node.is_terminal() {
            return vec![leaf];
        }

        let unexplored = node.unexplored_actions();
        if unexplored.is_empty() {
            return vec![leaf];
        }

        let width = if self.config.progressive_widening {
            expansion_width(node.visits(), unexplored.len())
        } else {
            1
        };

        index::sample(rng, unexplored.len(), width)
            .into_iter()
            .map(|i| tree.expand(leaf, unexplored[i].clone()))
            .collect()
    }

    fn should_stop_early<S: State>(&self, tree: &Tree<S>, iterations: usize) -> bool {
        let policy = &self.config.early_termination;
        if !policy.enabled || iterations < policy.min_simulations {
            return false;
        }

        let root = tree.root_id();
        if let Some(best) = tree.most_visited_child(root) {
            let confidence = tree.move_confidence(root, best);
            if confidence >= policy.confidence_threshold {
                tracing::debug!(iterations, confidence, "Stopping early: confident move");
                return true;
            }
        }

        let mut rewards: Vec<f64> = tree
            .root()
            .children()
            .iter()
            .map(|(_, child)| tree.get(*child).average_reward())
            .collect();
        if rewards.len() < 2 {
            return false;
        }
        rewards.sort_by(|a, b| b.total_cmp(a));
        let gap = rewards[0] - rewards[1];
        if gap >= policy.score_difference {
            tracing::debug!(iterations, gap, "Stopping early: clear leader");
            return true;
        }
        false
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

/// Agents whose readiness check passes, in pool order.
async fn ready_agents<S: State>(agents: &[Arc<dyn Agent<S>>]) -> Vec<Arc<dyn Agent<S>>> {
    let readiness = join_all(agents.iter().map(|agent| agent.is_ready())).await;
    agents
        .iter()
        .zip(readiness)
        .filter_map(|(agent, ready)| {
            if !ready {
                tracing::debug!(agent = %agent.id(), "Agent not ready, excluded from search");
            }
            ready.then(|| Arc::clone(agent))
        })
        .collect()
}

fn transition(phase: &mut SearchPhase, next: SearchPhase) {
    tracing::debug!(from = ?*phase, to = ?next, "Search phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_width() {
        assert_eq!(expansion_width(0, 10), 1);
        assert_eq!(expansion_width(1, 10), 2);
        assert_eq!(expansion_width(3, 10), 2);
        assert_eq!(expansion_width(8, 10), 3);
        assert_eq!(expansion_width(99, 10), 10);
        assert_eq!(expansion_width(99, 4), 4);
        assert_eq!(expansion_width(5, 0), 0);
    }

    #[test]
    fn test_termination_maps_to_phase() {
        assert_eq!(
            SearchPhase::from(TerminationReason::TimeExceeded),
            SearchPhase::TimeExceeded
        );
        assert_eq!(TerminationReason::default(), TerminationReason::Exhausted);
    }
}
