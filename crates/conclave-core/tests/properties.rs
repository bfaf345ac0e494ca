//! Property-based tests for the search tree and the evaluation auditors.
//!
//! Invariants checked:
//! - Unvisited children always win UCB1 selection
//! - Backpropagation touches every ancestor exactly once per reward
//! - Averages, move confidence and severities stay in [0, 1]
//! - Expansion is idempotent per action
//! - Identical opinions are always flagged as groupthink

use conclave_core::{
    Action, AgentId, BiasDetector, BiasDetectorConfig, DiversityAnalyzer, DiversityConfig,
    EvaluationResult, EvaluationSample, State, Tree,
};
use proptest::prelude::*;

// =============================================================================
// Test domain: a counter with `width` moves per level
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
struct Step(u8);

impl Action for Step {
    type Id = u8;

    fn id(&self) -> u8 {
        self.0
    }
}

#[derive(Clone, Debug)]
struct Ladder {
    width: u8,
    depth: usize,
    path: Vec<u8>,
}

impl State for Ladder {
    type Action = Step;
    type Player = usize;

    fn is_terminal(&self) -> bool {
        self.path.len() >= self.depth
    }

    fn current_player(&self) -> usize {
        self.path.len() % 2
    }

    fn valid_actions(&self) -> Vec<Step> {
        if self.is_terminal() {
            return vec![];
        }
        (0..self.width).map(Step).collect()
    }

    fn apply_action(&self, action: &Step) -> Self {
        let mut next = self.clone();
        next.path.push(action.0);
        next
    }

    fn hash_key(&self) -> String {
        format!("{:?}", self.path)
    }
}

fn ladder(width: u8, depth: usize) -> Tree<Ladder> {
    Tree::new(Ladder {
        width,
        depth,
        path: Vec::new(),
    })
}

// =============================================================================
// Strategies
// =============================================================================

fn arb_reward() -> impl Strategy<Value = f64> {
    0.0f64..=1.0
}

fn arb_exploration() -> impl Strategy<Value = f64> {
    0.01f64..10.0
}

/// Samples from a handful of agents with arbitrary scores.
fn arb_samples(max: usize) -> impl Strategy<Value = Vec<EvaluationSample>> {
    prop::collection::vec((0usize..4, arb_reward(), arb_reward(), 0usize..6), 0..max).prop_map(
        |raw| {
            raw.into_iter()
                .map(|(agent, score, confidence, depth)| {
                    let id = AgentId::new(format!("agent-{}", agent));
                    EvaluationSample::new(EvaluationResult::new(id, score, confidence), depth)
                })
                .collect()
        },
    )
}

// =============================================================================
// Tree
// =============================================================================

proptest! {
    #[test]
    fn prop_unvisited_child_wins_selection(
        rewards in prop::collection::vec(arb_reward(), 1..6),
        exploration in arb_exploration(),
    ) {
        let width = rewards.len() as u8 + 1;
        let mut tree = ladder(width, 1);
        let root = tree.root_id();
        let agent = AgentId::new("a");

        // Visit every child but the last
        for (i, reward) in rewards.iter().enumerate() {
            let child = tree.expand(root, Step(i as u8));
            tree.backpropagate(child, *reward, &agent);
        }
        let fresh = tree.expand(root, Step(width - 1));

        prop_assert_eq!(tree.ucb1(fresh, exploration), f64::INFINITY);
        prop_assert_eq!(tree.select_child(root, exploration), Some(fresh));
    }

    #[test]
    fn prop_ucb1_is_at_least_average(
        rewards in prop::collection::vec(arb_reward(), 1..20),
        exploration in arb_exploration(),
    ) {
        let mut tree = ladder(2, 1);
        let root = tree.root_id();
        let child = tree.expand(root, Step(0));
        let agent = AgentId::new("a");
        for reward in &rewards {
            tree.backpropagate(child, *reward, &agent);
        }

        let node = tree.get(child);
        let value = tree.ucb1(child, exploration);
        prop_assert!(value.is_finite());
        prop_assert!(value >= node.average_reward() - 1e-12);
    }

    #[test]
    fn prop_backpropagation_reaches_every_ancestor(
        path in prop::collection::vec(0u8..3, 1..6),
        rewards in prop::collection::vec(arb_reward(), 1..10),
    ) {
        let mut tree = ladder(3, path.len());
        let mut chain = vec![tree.root_id()];
        for step in &path {
            let last = *chain.last().unwrap();
            chain.push(tree.expand(last, Step(*step)));
        }

        let agent = AgentId::new("a");
        let leaf = *chain.last().unwrap();
        for reward in &rewards {
            tree.backpropagate(leaf, *reward, &agent);
        }

        let total: f64 = rewards.iter().sum();
        for id in &chain {
            let node = tree.get(*id);
            prop_assert_eq!(node.visits() as usize, rewards.len());
            prop_assert!((node.cumulative_reward() - total).abs() < 1e-9);
            prop_assert!((0.0..=1.0).contains(&node.average_reward()));
            prop_assert_eq!(node.agent_updates()[&agent] as usize, rewards.len());
        }
    }

    #[test]
    fn prop_expand_is_idempotent(actions in prop::collection::vec(0u8..4, 1..12)) {
        let mut tree = ladder(4, 2);
        let root = tree.root_id();

        for action in &actions {
            let first = tree.expand(root, Step(*action));
            let again = tree.expand(root, Step(*action));
            prop_assert_eq!(first, again);
        }

        let mut distinct = actions.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(tree.root().children().len(), distinct.len());
        prop_assert_eq!(tree.len(), distinct.len() + 1);
    }

    #[test]
    fn prop_move_confidence_in_unit_range(
        visits in prop::collection::vec(prop::collection::vec(arb_reward(), 0..6), 1..5),
    ) {
        let mut tree = ladder(visits.len() as u8, 1);
        let root = tree.root_id();
        let agent = AgentId::new("a");

        let children: Vec<_> = (0..visits.len())
            .map(|i| tree.expand(root, Step(i as u8)))
            .collect();
        for (child, rewards) in children.iter().zip(&visits) {
            for reward in rewards {
                tree.backpropagate(*child, *reward, &agent);
            }
        }

        for child in &children {
            let confidence = tree.move_confidence(root, *child);
            prop_assert!((0.0..=1.0).contains(&confidence));
        }
    }

    #[test]
    fn prop_most_visited_prefers_reward_on_ties(low in 0.0f64..0.5, high in 0.5f64..=1.0) {
        let mut tree = ladder(2, 1);
        let root = tree.root_id();
        let agent = AgentId::new("a");

        let first = tree.expand(root, Step(0));
        let second = tree.expand(root, Step(1));
        tree.backpropagate(first, low, &agent);
        tree.backpropagate(second, high, &agent);

        prop_assert_eq!(tree.most_visited_child(root), Some(second));
    }
}

// =============================================================================
// Auditors
// =============================================================================

proptest! {
    #[test]
    fn prop_too_few_samples_report_nothing(samples in arb_samples(5)) {
        let detector = BiasDetector::new(BiasDetectorConfig::default());
        prop_assert!(samples.len() < detector.config().min_evaluations);
        prop_assert!(detector.detect(&samples).is_empty());
    }

    #[test]
    fn prop_bias_severity_in_unit_range(samples in arb_samples(40)) {
        let detector = BiasDetector::new(BiasDetectorConfig::default());
        for report in detector.detect(&samples) {
            prop_assert!((0.0..=1.0).contains(&report.severity));
        }
    }

    #[test]
    fn prop_diversity_scores_in_unit_range(samples in arb_samples(40)) {
        let analyzer = DiversityAnalyzer::new(DiversityConfig::default());
        let evaluations: Vec<EvaluationResult> =
            samples.into_iter().map(|s| s.evaluation).collect();
        let analysis = analyzer.analyze_diversity(&evaluations);

        prop_assert!((0.0..=1.0).contains(&analysis.overall_score));
        prop_assert!((0.0..=1.0).contains(&analysis.disagreement_level));
        prop_assert!((0.0..=1.0).contains(&analysis.confidence));
        prop_assert_eq!(analysis.sample_size, evaluations.len());
    }

    #[test]
    fn prop_identical_opinions_are_groupthink(
        score in arb_reward(),
        confidence in arb_reward(),
        count in 3usize..30,
    ) {
        let analyzer = DiversityAnalyzer::new(DiversityConfig::default());
        let evaluations: Vec<EvaluationResult> = (0..count)
            .map(|i| EvaluationResult::new(AgentId::new(format!("agent-{}", i)), score, confidence))
            .collect();

        let analysis = analyzer.analyze_diversity(&evaluations);
        prop_assert!(analysis.groupthink_detected);
        prop_assert!(analysis.overall_score < 0.2);
    }
}
