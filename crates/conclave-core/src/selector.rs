//! Agent selection: which agent evaluates a freshly expanded node.
//!
//! Five strategies form a closed set chosen at construction. The per-agent
//! performance averages are shared by all of them and change only through
//! [`AgentSelector::update_performance`]; the search loop never calls it.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{AgentId, EvaluationResult};

/// Smoothing factor of the performance moving average.
pub const PERFORMANCE_ALPHA: f64 = 0.1;

/// Performance assumed for agents with no recorded history.
pub const NEUTRAL_PERFORMANCE: f64 = 0.5;

/// Minimum selection weight, so every agent keeps a chance to be picked.
pub const MIN_SELECTION_WEIGHT: f64 = 0.1;

/// Depth over which the adaptive strategy shifts from diversity to performance.
const ADAPTIVE_DEPTH_WINDOW: f64 = 10.0;

/// Errors from agent selection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("No agents to select from")]
    EmptyPool,
}

/// Strategy used to pick an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cycle through agents in a fixed order
    RoundRobin,

    /// Weighted random choice by moving-average performance
    PerformanceBased,

    /// Prefer agents that have not evaluated this node yet
    DiversityMaximizing,

    /// Diversity near the root, performance deep in the tree
    #[default]
    Adaptive,

    /// Uniform random choice
    Random,
}

/// What the selector may look at when choosing for a node.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Depth of the node to evaluate
    pub depth: usize,

    /// Evaluations already recorded on the node, keyed by agent
    pub evaluations: &'a BTreeMap<AgentId, EvaluationResult>,
}

impl<'a> SelectionContext<'a> {
    pub fn new(depth: usize, evaluations: &'a BTreeMap<AgentId, EvaluationResult>) -> Self {
        Self { depth, evaluations }
    }
}

/// Strategy together with the state only that strategy needs.
#[derive(Debug, Clone)]
enum StrategyState {
    RoundRobin { cursor: usize },
    PerformanceBased,
    DiversityMaximizing,
    Adaptive,
    Random,
}

impl From<SelectionStrategy> for StrategyState {
    fn from(strategy: SelectionStrategy) -> Self {
        match strategy {
            SelectionStrategy::RoundRobin => Self::RoundRobin { cursor: 0 },
            SelectionStrategy::PerformanceBased => Self::PerformanceBased,
            SelectionStrategy::DiversityMaximizing => Self::DiversityMaximizing,
            SelectionStrategy::Adaptive => Self::Adaptive,
            SelectionStrategy::Random => Self::Random,
        }
    }
}

/// Chooses an agent for each node that needs an evaluation.
#[derive(Debug, Clone)]
pub struct AgentSelector {
    strategy: StrategyState,
    performance: BTreeMap<AgentId, f64>,
    rng: ChaCha8Rng,
}

impl AgentSelector {
    /// Create a selector with an entropy-seeded RNG.
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self::with_rng(strategy, ChaCha8Rng::from_entropy())
    }

    /// Create a selector whose random choices are reproducible.
    pub fn with_seed(strategy: SelectionStrategy, seed: u64) -> Self {
        Self::with_rng(strategy, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(strategy: SelectionStrategy, rng: ChaCha8Rng) -> Self {
        Self {
            strategy: strategy.into(),
            performance: BTreeMap::new(),
            rng,
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        match self.strategy {
            StrategyState::RoundRobin { .. } => SelectionStrategy::RoundRobin,
            StrategyState::PerformanceBased => SelectionStrategy::PerformanceBased,
            StrategyState::DiversityMaximizing => SelectionStrategy::DiversityMaximizing,
            StrategyState::Adaptive => SelectionStrategy::Adaptive,
            StrategyState::Random => SelectionStrategy::Random,
        }
    }

    /// Fold a new observation into an agent's moving average.
    pub fn update_performance(&mut self, agent: &AgentId, score: f64) {
        let current = self.performance(agent);
        let updated = (1.0 - PERFORMANCE_ALPHA) * current + PERFORMANCE_ALPHA * score;
        self.performance.insert(agent.clone(), updated);
    }

    /// Current moving average for an agent (neutral if never updated).
    pub fn performance(&self, agent: &AgentId) -> f64 {
        self.performance
            .get(agent)
            .copied()
            .unwrap_or(NEUTRAL_PERFORMANCE)
    }

    pub fn performance_scores(&self) -> &BTreeMap<AgentId, f64> {
        &self.performance
    }

    /// Pick an agent for a node, returning its index in `agents`.
    pub fn select(
        &mut self,
        agents: &[AgentId],
        context: SelectionContext<'_>,
    ) -> Result<usize, SelectorError> {
        match agents.len() {
            0 => return Err(SelectorError::EmptyPool),
            1 => return Ok(0),
            _ => {}
        }

        let index = match &mut self.strategy {
            StrategyState::RoundRobin { cursor } => {
                let index = *cursor % agents.len();
                *cursor = (index + 1) % agents.len();
                index
            }
            StrategyState::PerformanceBased => self.by_performance(agents),
            StrategyState::DiversityMaximizing => self.by_diversity(agents, context),
            StrategyState::Adaptive => {
                let fraction = (context.depth as f64 / ADAPTIVE_DEPTH_WINDOW).min(1.0);
                if fraction < 0.3 {
                    self.by_diversity(agents, context)
                } else if fraction > 0.7 || self.rng.gen_bool(0.5) {
                    self.by_performance(agents)
                } else {
                    self.by_diversity(agents, context)
                }
            }
            StrategyState::Random => self.rng.gen_range(0..agents.len()),
        };

        tracing::trace!(
            strategy = ?self.strategy(),
            agent = %agents[index],
            depth = context.depth,
            "Selected agent"
        );

        Ok(index)
    }

    fn by_performance(&mut self, agents: &[AgentId]) -> usize {
        let weights: Vec<f64> = agents
            .iter()
            .map(|agent| self.performance(agent).max(MIN_SELECTION_WEIGHT))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut threshold = self.rng.gen::<f64>() * total;
        for (index, weight) in weights.iter().enumerate() {
            if threshold < *weight {
                return index;
            }
            threshold -= weight;
        }

        agents.len() - 1
    }

    fn by_diversity(&mut self, agents: &[AgentId], context: SelectionContext<'_>) -> usize {
        let fresh: Vec<usize> = (0..agents.len())
            .filter(|&i| !context.evaluations.contains_key(&agents[i]))
            .collect();

        if let Some(&index) = fresh.choose(&mut self.rng) {
            return index;
        }

        // Everyone has weighed in: give the most pessimistic agent another turn.
        let mut lowest = 0;
        let mut lowest_score = f64::INFINITY;
        for (index, agent) in agents.iter().enumerate() {
            let score = context
                .evaluations
                .get(agent)
                .map(|e| e.score)
                .unwrap_or(f64::INFINITY);
            if score < lowest_score {
                lowest = index;
                lowest_score = score;
            }
        }
        lowest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::new(*n)).collect()
    }

    fn no_evaluations() -> BTreeMap<AgentId, EvaluationResult> {
        BTreeMap::new()
    }

    #[test]
    fn test_empty_pool_fails() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::Random, 1);
        let evals = no_evaluations();
        let result = selector.select(&[], SelectionContext::new(0, &evals));
        assert_eq!(result, Err(SelectorError::EmptyPool));
    }

    #[test]
    fn test_single_agent_short_circuits() {
        for strategy in [
            SelectionStrategy::RoundRobin,
            SelectionStrategy::PerformanceBased,
            SelectionStrategy::DiversityMaximizing,
            SelectionStrategy::Adaptive,
            SelectionStrategy::Random,
        ] {
            let mut selector = AgentSelector::with_seed(strategy, 7);
            let evals = no_evaluations();
            let agents = pool(&["solo"]);
            for depth in 0..12 {
                assert_eq!(selector.select(&agents, SelectionContext::new(depth, &evals)), Ok(0));
            }
        }
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::RoundRobin, 0);
        let agents = pool(&["a", "b", "c"]);
        let evals = no_evaluations();

        let picks: Vec<usize> = (0..7)
            .map(|d| selector.select(&agents, SelectionContext::new(d, &evals)).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_ema_update() {
        let mut selector = AgentSelector::new(SelectionStrategy::PerformanceBased);
        let agent = AgentId::new("a");

        selector.update_performance(&agent, 1.0);
        assert!((selector.performance(&agent) - 0.55).abs() < 1e-12);

        selector.update_performance(&agent, 1.0);
        assert!((selector.performance(&agent) - 0.595).abs() < 1e-12);
        assert_eq!(selector.performance(&AgentId::new("other")), NEUTRAL_PERFORMANCE);
    }

    #[test]
    fn test_performance_based_favors_strong_agent() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::PerformanceBased, 42);
        let agents = pool(&["weak", "strong"]);
        for _ in 0..60 {
            selector.update_performance(&agents[0], -1.0);
            selector.update_performance(&agents[1], 1.0);
        }
        let evals = no_evaluations();

        let mut counts = [0usize; 2];
        for _ in 0..1000 {
            counts[selector.select(&agents, SelectionContext::new(3, &evals)).unwrap()] += 1;
        }

        // Weak agent floors at 0.1 weight against ~1.0, so it still gets picked
        assert!(counts[1] > counts[0] * 3);
        assert!(counts[0] > 0);
    }

    #[test]
    fn test_diversity_prefers_agents_without_evaluation() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::DiversityMaximizing, 3);
        let agents = pool(&["a", "b", "c"]);
        let mut evals = BTreeMap::new();
        evals.insert(agents[0].clone(), EvaluationResult::new("a", 0.5, 0.5));
        evals.insert(agents[2].clone(), EvaluationResult::new("c", 0.5, 0.5));

        for _ in 0..20 {
            assert_eq!(selector.select(&agents, SelectionContext::new(0, &evals)), Ok(1));
        }
    }

    #[test]
    fn test_diversity_falls_back_to_lowest_score() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::DiversityMaximizing, 3);
        let agents = pool(&["a", "b", "c"]);
        let mut evals = BTreeMap::new();
        evals.insert(agents[0].clone(), EvaluationResult::new("a", 0.6, 0.5));
        evals.insert(agents[1].clone(), EvaluationResult::new("b", 0.2, 0.5));
        evals.insert(agents[2].clone(), EvaluationResult::new("c", 0.9, 0.5));

        assert_eq!(selector.select(&agents, SelectionContext::new(0, &evals)), Ok(1));
    }

    #[test]
    fn test_adaptive_is_diversity_near_root() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::Adaptive, 11);
        let agents = pool(&["a", "b"]);
        let mut evals = BTreeMap::new();
        evals.insert(agents[0].clone(), EvaluationResult::new("a", 0.5, 0.5));

        // Depth 2 -> fraction 0.2 -> always the agent that has not evaluated
        for _ in 0..20 {
            assert_eq!(selector.select(&agents, SelectionContext::new(2, &evals)), Ok(1));
        }
    }

    /// "strong" has evaluated the node and a near-perfect record; "weak" is
    /// fresh with a record at the weight floor.
    fn adaptive_counts(depth: usize, seed: u64) -> [usize; 2] {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::Adaptive, seed);
        let agents = pool(&["strong", "weak"]);
        for _ in 0..50 {
            selector.update_performance(&agents[0], 1.0);
            selector.update_performance(&agents[1], 0.0);
        }
        let mut evals = BTreeMap::new();
        evals.insert(agents[0].clone(), EvaluationResult::new("strong", 0.9, 0.9));

        let mut counts = [0; 2];
        for _ in 0..200 {
            counts[selector.select(&agents, SelectionContext::new(depth, &evals)).unwrap()] += 1;
        }
        counts
    }

    #[test]
    fn test_adaptive_is_performance_when_deep() {
        // Depth 9 -> fraction 0.9 -> weighted by performance (~91% strong),
        // even though "weak" has not evaluated the node yet
        let [strong, weak] = adaptive_counts(9, 17);
        assert!(strong > 160, "strong picked {} times", strong);
        assert!(weak > 0);
    }

    #[test]
    fn test_adaptive_mixes_in_middle_band() {
        // Depth 5 -> fraction 0.5 -> coin flip between the two: diversity
        // always picks "weak", performance mostly "strong"
        let [strong, weak] = adaptive_counts(5, 17);
        assert!((60..=130).contains(&strong), "strong picked {} times", strong);
        assert!(weak >= 70, "weak picked {} times", weak);
    }

    #[test]
    fn test_random_covers_pool() {
        let mut selector = AgentSelector::with_seed(SelectionStrategy::Random, 5);
        let agents = pool(&["a", "b", "c"]);
        let evals = no_evaluations();

        let mut seen = [false; 3];
        for _ in 0..100 {
            seen[selector.select(&agents, SelectionContext::new(0, &evals)).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_strategy_serde_names() {
        let strategy: SelectionStrategy = serde_yaml::from_str("diversity_maximizing").unwrap();
        assert_eq!(strategy, SelectionStrategy::DiversityMaximizing);
        assert_eq!(
            serde_json::to_string(&SelectionStrategy::RoundRobin).unwrap(),
            "\"round_robin\""
        );
    }
}
