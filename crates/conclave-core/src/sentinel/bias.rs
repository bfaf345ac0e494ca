//! Statistical bias checks over a batch of evaluations.
//!
//! Every check needs at least `min_evaluations` samples. Under-populated
//! batches are normal early in a search, so they yield no report rather
//! than an error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{AgentId, EvaluationSample};

/// Kind of bias a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasType {
    Systematic,
    Temporal,
    Positional,
    Confirmation,
    Anchoring,
    Groupthink,
}

impl BiasType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasType::Systematic => "systematic",
            BiasType::Temporal => "temporal",
            BiasType::Positional => "positional",
            BiasType::Confirmation => "confirmation",
            BiasType::Anchoring => "anchoring",
            BiasType::Groupthink => "groupthink",
        }
    }
}

/// One detected bias pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    pub bias_type: BiasType,

    /// How pronounced the pattern is (0.0 - 1.0)
    pub severity: f64,

    pub description: String,

    /// Agents whose evaluations exhibit the pattern
    pub agents: BTreeSet<AgentId>,
}

/// Thresholds for the bias checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasDetectorConfig {
    /// Samples required before any check runs
    pub min_evaluations: usize,

    /// Allowed deviation of an agent's mean from the grand mean
    pub systematic_bias_threshold: f64,

    /// Evaluations per sliding window for trend detection
    pub temporal_window: usize,

    /// Allowed drift between the halves of a window
    pub temporal_bias_threshold: f64,

    /// Allowed |correlation| between node depth and score
    pub positional_bias_threshold: f64,

    pub anchoring_detection_enabled: bool,

    /// Distance from the first score that counts as "anchored"
    pub anchoring_tolerance: f64,

    /// Share of later evaluations that must be anchored to report
    pub anchoring_ratio_threshold: f64,

    pub confirmation_detection_enabled: bool,

    /// Required excess of late agreement over the early majority share
    pub confirmation_threshold: f64,
}

impl Default for BiasDetectorConfig {
    fn default() -> Self {
        Self {
            min_evaluations: 5,
            systematic_bias_threshold: 0.2,
            temporal_window: 10,
            temporal_bias_threshold: 0.25,
            positional_bias_threshold: 0.6,
            anchoring_detection_enabled: true,
            anchoring_tolerance: 0.05,
            anchoring_ratio_threshold: 0.8,
            confirmation_detection_enabled: true,
            confirmation_threshold: 0.25,
        }
    }
}

/// Runs the bias checks.
#[derive(Debug, Clone, Default)]
pub struct BiasDetector {
    config: BiasDetectorConfig,
}

impl BiasDetector {
    pub fn new(config: BiasDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BiasDetectorConfig {
        &self.config
    }

    /// Run every enabled check; one report per check that fires.
    pub fn detect(&self, samples: &[EvaluationSample]) -> Vec<BiasReport> {
        if !self.has_enough(samples) {
            return Vec::new();
        }

        let mut reports = Vec::new();
        reports.extend(self.detect_systematic_bias(samples));
        reports.extend(self.detect_temporal_bias(samples));
        reports.extend(self.detect_positional_bias(samples));
        if self.config.anchoring_detection_enabled {
            reports.extend(self.detect_anchoring_bias(samples));
        }
        if self.config.confirmation_detection_enabled {
            reports.extend(self.detect_confirmation_bias(samples));
        }

        tracing::debug!(
            samples = samples.len(),
            reports = reports.len(),
            "Bias detection complete"
        );
        reports
    }

    /// Agents whose mean score strays from the mean of all agent means.
    pub fn detect_systematic_bias(&self, samples: &[EvaluationSample]) -> Option<BiasReport> {
        if !self.has_enough(samples) {
            return None;
        }

        let deviations = agent_deviations(samples);
        let threshold = self.config.systematic_bias_threshold;
        let biased: BTreeMap<&AgentId, f64> = deviations
            .iter()
            .filter(|(_, dev)| dev.abs() > threshold)
            .map(|(agent, dev)| (agent, *dev))
            .collect();

        let max_deviation = biased.values().map(|d| d.abs()).fold(0.0, f64::max);
        if biased.is_empty() {
            return None;
        }

        let detail = biased
            .iter()
            .map(|(agent, dev)| format!("{} ({:+.2})", agent, dev))
            .collect::<Vec<_>>()
            .join(", ");

        Some(BiasReport {
            bias_type: BiasType::Systematic,
            severity: scaled_severity(max_deviation, threshold),
            description: format!("Agents deviate from the cross-agent mean: {}", detail),
            agents: biased.keys().map(|a| (*a).clone()).collect(),
        })
    }

    /// Drift of mean score within a sliding window of chronological samples.
    pub fn detect_temporal_bias(&self, samples: &[EvaluationSample]) -> Option<BiasReport> {
        if !self.has_enough(samples) {
            return None;
        }

        let ordered = chronological(samples);
        let width = self.config.temporal_window.min(ordered.len());
        if width < 2 {
            return None;
        }
        let half = width / 2;

        let mut strongest: Option<(usize, f64)> = None;
        for (start, window) in ordered.windows(width).enumerate() {
            let early = mean(window[..half].iter().map(|s| s.score()));
            let late = mean(window[width - half..].iter().map(|s| s.score()));
            let trend = late - early;
            if strongest.map_or(true, |(_, t)| trend.abs() > t.abs()) {
                strongest = Some((start, trend));
            }
        }

        let (start, trend) = strongest?;
        let threshold = self.config.temporal_bias_threshold;
        if trend.abs() <= threshold {
            return None;
        }

        Some(BiasReport {
            bias_type: BiasType::Temporal,
            severity: scaled_severity(trend.abs(), threshold),
            description: format!(
                "Scores {} by {:.2} across {} consecutive evaluations",
                if trend > 0.0 { "rose" } else { "fell" },
                trend.abs(),
                width
            ),
            agents: ordered[start..start + width]
                .iter()
                .map(|s| s.agent_id().clone())
                .collect(),
        })
    }

    /// Correlation between node depth and score.
    pub fn detect_positional_bias(&self, samples: &[EvaluationSample]) -> Option<BiasReport> {
        if !self.has_enough(samples) {
            return None;
        }

        let depths: Vec<f64> = samples.iter().map(|s| s.depth as f64).collect();
        let scores: Vec<f64> = samples.iter().map(|s| s.score()).collect();
        let r = pearson(&depths, &scores)?;
        if r.abs() <= self.config.positional_bias_threshold {
            return None;
        }

        Some(BiasReport {
            bias_type: BiasType::Positional,
            severity: r.abs().min(1.0),
            description: format!(
                "Scores {} with tree depth (r = {:.2})",
                if r > 0.0 { "increase" } else { "decrease" },
                r
            ),
            agents: samples.iter().map(|s| s.agent_id().clone()).collect(),
        })
    }

    /// Later evaluations clustering around the first score seen.
    pub fn detect_anchoring_bias(&self, samples: &[EvaluationSample]) -> Option<BiasReport> {
        if !self.has_enough(samples) {
            return None;
        }

        let ordered = chronological(samples);
        let (anchor, later) = ordered.split_first()?;
        if later.is_empty() {
            return None;
        }
        let tolerance = self.config.anchoring_tolerance;
        let anchored: Vec<&&EvaluationSample> = later
            .iter()
            .filter(|s| (s.score() - anchor.score()).abs() <= tolerance)
            .collect();

        let ratio = anchored.len() as f64 / later.len() as f64;
        if ratio < self.config.anchoring_ratio_threshold {
            return None;
        }

        Some(BiasReport {
            bias_type: BiasType::Anchoring,
            severity: ratio.min(1.0),
            description: format!(
                "{:.0}% of later evaluations stay within {:.2} of the first score {:.2}",
                ratio * 100.0,
                tolerance,
                anchor.score()
            ),
            agents: anchored.iter().map(|s| s.agent_id().clone()).collect(),
        })
    }

    /// Late evaluations piling onto the side favored early.
    pub fn detect_confirmation_bias(&self, samples: &[EvaluationSample]) -> Option<BiasReport> {
        if !self.has_enough(samples) {
            return None;
        }

        let ordered = chronological(samples);
        let half = ordered.len() / 2;
        if half == 0 {
            return None;
        }
        let (early, late) = ordered.split_at(half);

        let early_favorable =
            early.iter().filter(|s| is_favorable(s.score())).count() as f64 / early.len() as f64;
        let majority_favorable = early_favorable >= 0.5;
        let majority_share = early_favorable.max(1.0 - early_favorable);
        if majority_share >= 1.0 {
            return None;
        }

        let agreeing: Vec<&&EvaluationSample> = late
            .iter()
            .filter(|s| is_favorable(s.score()) == majority_favorable)
            .collect();
        let agreement = agreeing.len() as f64 / late.len() as f64;
        let excess = agreement - majority_share;
        if excess < self.config.confirmation_threshold {
            return None;
        }

        Some(BiasReport {
            bias_type: BiasType::Confirmation,
            severity: (excess / (1.0 - majority_share)).clamp(0.0, 1.0),
            description: format!(
                "Early {} majority of {:.0}% grew to {:.0}% agreement",
                if majority_favorable { "favorable" } else { "unfavorable" },
                majority_share * 100.0,
                agreement * 100.0
            ),
            agents: agreeing.iter().map(|s| s.agent_id().clone()).collect(),
        })
    }

    fn has_enough(&self, samples: &[EvaluationSample]) -> bool {
        !samples.is_empty() && samples.len() >= self.config.min_evaluations
    }
}

/// Each agent's mean score minus the mean of all agent means.
pub fn agent_deviations(samples: &[EvaluationSample]) -> BTreeMap<AgentId, f64> {
    let mut per_agent: BTreeMap<&AgentId, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        per_agent
            .entry(sample.agent_id())
            .or_default()
            .push(sample.score());
    }

    let means: BTreeMap<&AgentId, f64> = per_agent
        .into_iter()
        .map(|(agent, scores)| (agent, mean(scores.into_iter())))
        .collect();
    let grand = mean(means.values().copied());

    means
        .into_iter()
        .map(|(agent, m)| (agent.clone(), m - grand))
        .collect()
}

/// Samples in timestamp order, or recording order if any timestamp is missing.
fn chronological(samples: &[EvaluationSample]) -> Vec<&EvaluationSample> {
    let mut ordered: Vec<&EvaluationSample> = samples.iter().collect();
    if ordered.iter().all(|s| s.evaluation.timestamp.is_some()) {
        ordered.sort_by_key(|s| s.evaluation.timestamp);
    }
    ordered
}

fn is_favorable(score: f64) -> bool {
    score >= 0.5
}

fn scaled_severity(magnitude: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (magnitude / (2.0 * threshold)).min(1.0)
}

pub(crate) fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Pearson correlation; `None` when either series has no variance.
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let mx = mean(xs.iter().copied());
    let my = mean(ys.iter().copied());

    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }

    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}
