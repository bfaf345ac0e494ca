//! Meta-evaluation of the agent pool.
//!
//! The sentinel audits the evaluations gathered under a node for bias and
//! lack of diversity. It never changes search statistics: score adjustments
//! it proposes are advisory metadata on its result.

pub mod bias;
pub mod diversity;

pub use bias::{BiasDetector, BiasDetectorConfig, BiasReport, BiasType};
pub use diversity::{DiversityAnalysis, DiversityAnalyzer, DiversityConfig};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ensure_non_negative, ensure_unit, ConfigError, ConfigFile};
use crate::domain::State;
use crate::tree::{NodeId, Tree};
use crate::types::{AgentId, EvaluationResult, EvaluationSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Run the bias checks (diversity analysis always runs)
    pub bias_detection_enabled: bool,

    /// Propose score adjustments for implicated agents
    pub learning_enabled: bool,

    /// Fraction of an agent's deviation to propose correcting
    pub correction_strength: f64,

    /// Upper bound on any single adjustment
    pub max_correction: f64,

    pub bias: BiasDetectorConfig,

    pub diversity: DiversityConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            bias_detection_enabled: true,
            learning_enabled: false,
            correction_strength: 0.1,
            max_correction: 0.3,
            bias: BiasDetectorConfig::default(),
            diversity: DiversityConfig::default(),
        }
    }
}

impl ConfigFile for SentinelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_unit("correction_strength", self.correction_strength)?;
        ensure_unit("max_correction", self.max_correction)?;

        let bias = &self.bias;
        ensure_non_negative("systematic_bias_threshold", bias.systematic_bias_threshold)?;
        ensure_non_negative("temporal_bias_threshold", bias.temporal_bias_threshold)?;
        ensure_unit("positional_bias_threshold", bias.positional_bias_threshold)?;
        ensure_non_negative("anchoring_tolerance", bias.anchoring_tolerance)?;
        ensure_unit("anchoring_ratio_threshold", bias.anchoring_ratio_threshold)?;
        ensure_unit("confirmation_threshold", bias.confirmation_threshold)?;

        let diversity = &self.diversity;
        ensure_non_negative("score_weight", diversity.score_weight)?;
        ensure_non_negative("confidence_weight", diversity.confidence_weight)?;
        ensure_non_negative("reasoning_weight", diversity.reasoning_weight)?;
        if diversity.score_weight + diversity.confidence_weight + diversity.reasoning_weight
            <= 0.0
        {
            return Err(ConfigError::ValidationError(
                "diversity weights must not all be zero".to_string(),
            ));
        }
        ensure_unit("groupthink_threshold", diversity.groupthink_threshold)?;
        if diversity.bins == 0 {
            return Err(ConfigError::ValidationError(
                "diversity bins must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Summary of one child of the audited node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub visits: u32,
    pub average_reward: f64,
    pub evaluation_count: usize,
}

/// What the sentinel looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentinelContext {
    pub visits: u32,
    pub average_reward: f64,
    pub children: Vec<ChildSummary>,
    pub depth: usize,

    /// Evaluations gathered in the audited subtree
    pub history: Vec<EvaluationSample>,
}

impl SentinelContext {
    /// Context for the subtree rooted at `node`.
    pub fn from_tree<S: State>(tree: &Tree<S>, node: NodeId) -> Self {
        let audited = tree.get(node);
        let children = audited
            .children()
            .iter()
            .map(|(_, child_id)| {
                let child = tree.get(*child_id);
                ChildSummary {
                    visits: child.visits(),
                    average_reward: child.average_reward(),
                    evaluation_count: child.evaluations().len(),
                }
            })
            .collect();

        Self {
            visits: audited.visits(),
            average_reward: audited.average_reward(),
            children,
            depth: audited.depth(),
            history: tree.evaluation_history(node),
        }
    }

    fn evaluations(&self) -> Vec<EvaluationResult> {
        self.history.iter().map(|s| s.evaluation.clone()).collect()
    }
}

/// Running record of past audits.
///
/// Owned by the caller and passed through
/// [`SentinelAgent::evaluate_with_memory`], so repeated flags against the
/// same agent strengthen later corrections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentinelMemory {
    /// Reports issued per bias type
    pub detections: BTreeMap<BiasType, u32>,

    /// Reports each agent was implicated in
    pub agent_flags: BTreeMap<AgentId, u32>,

    pub audits: u32,
}

impl SentinelMemory {
    pub fn flags_for(&self, agent: &AgentId) -> u32 {
        self.agent_flags.get(agent).copied().unwrap_or(0)
    }

    fn record(&mut self, reports: &[BiasReport]) {
        self.audits += 1;
        for report in reports {
            *self.detections.entry(report.bias_type).or_insert(0) += 1;
            for agent in &report.agents {
                *self.agent_flags.entry(agent.clone()).or_insert(0) += 1;
            }
        }
    }
}

/// Result of one audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelEvaluation {
    pub bias_detected: bool,
    pub bias_reports: Vec<BiasReport>,
    pub diversity: DiversityAnalysis,
    pub diversity_score: f64,
    pub recommendations: Vec<String>,

    /// Trust in this audit (0.0 - 1.0)
    pub confidence: f64,

    /// Advisory per-agent score corrections (learning mode only)
    pub score_adjustments: BTreeMap<AgentId, f64>,
}

/// Audits agent evaluations for bias and groupthink.
#[derive(Debug, Clone, Default)]
pub struct SentinelAgent {
    config: SentinelConfig,
    detector: BiasDetector,
    analyzer: DiversityAnalyzer,
}

impl SentinelAgent {
    pub fn new(config: SentinelConfig) -> Self {
        Self {
            detector: BiasDetector::new(config.bias.clone()),
            analyzer: DiversityAnalyzer::new(config.diversity.clone()),
            config,
        }
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Audit with no memory of earlier audits.
    pub fn evaluate(&self, context: &SentinelContext) -> SentinelEvaluation {
        self.evaluate_with_memory(context, SentinelMemory::default()).0
    }

    /// Audit and return the memory updated with this audit's findings.
    pub fn evaluate_with_memory(
        &self,
        context: &SentinelContext,
        memory: SentinelMemory,
    ) -> (SentinelEvaluation, SentinelMemory) {
        let mut reports = if self.config.bias_detection_enabled {
            self.detector.detect(&context.history)
        } else {
            Vec::new()
        };

        let diversity = self.analyzer.analyze_diversity(&context.evaluations());
        if diversity.groupthink_detected {
            reports.push(BiasReport {
                bias_type: BiasType::Groupthink,
                severity: (1.0 - diversity.overall_score).clamp(0.0, 1.0),
                description: format!(
                    "Evaluations converge: diversity {:.2} across {} samples",
                    diversity.overall_score, diversity.sample_size
                ),
                agents: context
                    .history
                    .iter()
                    .map(|s| s.agent_id().clone())
                    .collect(),
            });
        }

        let recommendations = reports.iter().map(recommendation).collect();
        let max_severity = reports.iter().map(|r| r.severity).fold(0.0, f64::max);
        let confidence = 0.5 * (1.0 - max_severity) + 0.5 * diversity.confidence;

        let score_adjustments = if self.config.learning_enabled {
            self.corrections(context, &reports, &memory)
        } else {
            BTreeMap::new()
        };

        if !reports.is_empty() {
            tracing::debug!(
                depth = context.depth,
                reports = reports.len(),
                max_severity,
                "Sentinel flagged evaluations"
            );
        }

        let mut memory = memory;
        memory.record(&reports);

        let evaluation = SentinelEvaluation {
            bias_detected: !reports.is_empty(),
            diversity_score: diversity.overall_score,
            bias_reports: reports,
            diversity,
            recommendations,
            confidence: confidence.clamp(0.0, 1.0),
            score_adjustments,
        };

        (evaluation, memory)
    }

    /// Adjustment opposing each implicated agent's deviation from the grand mean.
    fn corrections(
        &self,
        context: &SentinelContext,
        reports: &[BiasReport],
        memory: &SentinelMemory,
    ) -> BTreeMap<AgentId, f64> {
        let implicated: BTreeSet<&AgentId> = reports.iter().flat_map(|r| &r.agents).collect();
        let deviations = bias::agent_deviations(&context.history);
        let bound = self.config.max_correction;

        implicated
            .into_iter()
            .filter_map(|agent| {
                let deviation = deviations.get(agent)?;
                let escalation = 1.0 + 0.5 * f64::from(memory.flags_for(agent));
                let adjustment =
                    (-deviation * self.config.correction_strength * escalation).clamp(-bound, bound);
                Some((agent.clone(), adjustment))
            })
            .collect()
    }
}

fn recommendation(report: &BiasReport) -> String {
    let agents = report
        .agents
        .iter()
        .map(AgentId::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    match report.bias_type {
        BiasType::Systematic => format!("Recalibrate or down-weight agents: {}", agents),
        BiasType::Temporal => {
            "Scores drift over time; check agents for accumulated state".to_string()
        }
        BiasType::Positional => {
            "Scores track tree depth; normalize evaluations across depths".to_string()
        }
        BiasType::Anchoring => {
            "Later evaluations anchor on the first score; evaluate states independently"
                .to_string()
        }
        BiasType::Confirmation => {
            "Early consensus is self-reinforcing; add agents with opposing priors".to_string()
        }
        BiasType::Groupthink => {
            "Agents agree too closely; diversify the pool or its prompts".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(samples: Vec<EvaluationSample>) -> SentinelContext {
        SentinelContext {
            history: samples,
            ..Default::default()
        }
    }

    fn skewed_history() -> Vec<EvaluationSample> {
        let mut samples = Vec::new();
        for i in 0..4 {
            let spread = i as f64 * 0.1;
            samples.push(EvaluationSample::new(
                EvaluationResult::new("fair", 0.3 + spread, 0.3 + spread),
                1,
            ));
            samples.push(EvaluationSample::new(
                EvaluationResult::new("optimist", 0.95, 0.9),
                1,
            ));
        }
        samples
    }

    #[test]
    fn test_empty_context_is_quiet() {
        let result = SentinelAgent::default().evaluate(&SentinelContext::default());
        assert!(!result.bias_detected);
        assert!(result.recommendations.is_empty());
        assert_eq!(result.diversity_score, 0.5);
        // No severity, zero analysis confidence
        assert!((result.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_evaluation_is_not_biased() {
        let config = SentinelConfig {
            bias: BiasDetectorConfig {
                min_evaluations: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let history = vec![EvaluationSample::new(EvaluationResult::new("a", 0.5, 0.8), 1)];
        let result = SentinelAgent::new(config).evaluate(&context(history));
        assert!(!result.bias_detected);
        assert!(result.bias_reports.is_empty());
    }

    #[test]
    fn test_groupthink_is_reported() {
        let samples = (0..6)
            .map(|_| EvaluationSample::new(EvaluationResult::new("a", 0.6, 0.7), 1))
            .collect();
        let config = SentinelConfig {
            bias_detection_enabled: false,
            ..Default::default()
        };

        let result = SentinelAgent::new(config).evaluate(&context(samples));
        assert!(result.bias_detected);
        assert_eq!(result.bias_reports.len(), 1);
        assert_eq!(result.bias_reports[0].bias_type, BiasType::Groupthink);
        assert_eq!(result.recommendations.len(), 1);
    }

    #[test]
    fn test_no_adjustments_without_learning() {
        let result = SentinelAgent::default().evaluate(&context(skewed_history()));
        assert!(result
            .bias_reports
            .iter()
            .any(|r| r.bias_type == BiasType::Systematic));
        assert!(result.score_adjustments.is_empty());
    }

    #[test]
    fn test_learning_escalates_with_memory() {
        let config = SentinelConfig {
            learning_enabled: true,
            ..Default::default()
        };
        let sentinel = SentinelAgent::new(config);
        let ctx = context(skewed_history());
        let optimist = AgentId::new("optimist");

        let (first, memory) = sentinel.evaluate_with_memory(&ctx, SentinelMemory::default());
        let first_adj = first.score_adjustments[&optimist];
        assert!(first_adj < 0.0);
        assert_eq!(memory.audits, 1);
        assert!(memory.flags_for(&optimist) >= 1);
        assert!(memory.detections.contains_key(&BiasType::Systematic));

        let (second, memory) = sentinel.evaluate_with_memory(&ctx, memory);
        let second_adj = second.score_adjustments[&optimist];
        assert!(second_adj < first_adj);
        assert!(second_adj >= -sentinel.config().max_correction);
        assert_eq!(memory.audits, 2);
    }

    #[test]
    fn test_confidence_drops_with_severity() {
        let clean: Vec<_> = [0.1, 0.5, 0.9, 0.3, 0.7, 0.2]
            .iter()
            .zip(["a", "b", "c", "a", "b", "c"])
            .map(|(score, agent)| {
                EvaluationSample::new(EvaluationResult::new(agent, *score, *score), 1)
            })
            .collect();

        let sentinel = SentinelAgent::default();
        let clean_result = sentinel.evaluate(&context(clean));
        let skewed_result = sentinel.evaluate(&context(skewed_history()));
        assert!(skewed_result.confidence < clean_result.confidence);
    }

    #[test]
    fn test_from_tree() {
        use crate::domain::Action;

        #[derive(Clone, Debug, PartialEq)]
        struct Go(u8);

        impl Action for Go {
            type Id = u8;

            fn id(&self) -> u8 {
                self.0
            }
        }

        #[derive(Clone, Debug)]
        struct Pos(u8);

        impl State for Pos {
            type Action = Go;
            type Player = ();

            fn is_terminal(&self) -> bool {
                self.0 > 0
            }

            fn current_player(&self) -> Self::Player {}

            fn valid_actions(&self) -> Vec<Go> {
                vec![Go(1), Go(2)]
            }

            fn apply_action(&self, action: &Go) -> Self {
                Pos(action.0)
            }

            fn hash_key(&self) -> String {
                self.0.to_string()
            }
        }

        let mut tree = Tree::new(Pos(0));
        let child = tree.expand(NodeId::ROOT, Go(1));
        tree.record_evaluation(child, EvaluationResult::new("a", 0.4, 0.5));
        tree.backpropagate(child, 0.4, &AgentId::new("a"));

        let ctx = SentinelContext::from_tree(&tree, NodeId::ROOT);
        assert_eq!(ctx.visits, 1);
        assert_eq!(ctx.children.len(), 1);
        assert_eq!(ctx.children[0].evaluation_count, 1);
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.history[0].depth, 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(SentinelConfig::default().validate().is_ok());

        let yaml = "learning_enabled: true\ndiversity:\n  groupthink_threshold: 0.3\n";
        let config = SentinelConfig::from_yaml(yaml).unwrap();
        assert!(config.learning_enabled);
        assert_eq!(config.diversity.groupthink_threshold, 0.3);
        assert_eq!(config.diversity.bins, 10);

        let bad = "max_correction: 2.0\n";
        assert!(matches!(
            SentinelConfig::from_yaml(bad),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
