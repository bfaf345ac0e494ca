//! Diversity of opinion across a set of evaluations.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::types::EvaluationResult;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z0-9']+").unwrap();
}

/// Confidence std-dev that counts as fully diverse.
const MAX_CONFIDENCE_SPREAD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    /// Evaluations required before analysis runs
    pub min_evaluations: usize,

    /// Weight of the score-entropy component
    pub score_weight: f64,

    /// Weight of the confidence-spread component
    pub confidence_weight: f64,

    /// Weight of the reasoning-dissimilarity component
    pub reasoning_weight: f64,

    /// Overall diversity below this counts as groupthink
    pub groupthink_threshold: f64,

    /// Histogram buckets for score entropy
    pub bins: usize,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            min_evaluations: 3,
            score_weight: 0.5,
            confidence_weight: 0.2,
            reasoning_weight: 0.3,
            groupthink_threshold: 0.2,
            bins: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversityAnalysis {
    /// Weighted diversity (0.0 - 1.0)
    pub overall_score: f64,

    /// Shannon entropy of the score histogram, in bits
    pub entropy: f64,

    /// Population variance of scores
    pub variance: f64,

    /// `min(1, 4 * variance)`
    pub disagreement_level: f64,

    pub groupthink_detected: bool,

    /// Trust in the analysis itself, growing with sample size
    pub confidence: f64,

    pub sample_size: usize,
}

impl DiversityAnalysis {
    /// Result for batches too small to analyze.
    pub fn neutral(sample_size: usize) -> Self {
        Self {
            overall_score: 0.5,
            entropy: 0.0,
            variance: 0.0,
            disagreement_level: 0.0,
            groupthink_detected: false,
            confidence: 0.0,
            sample_size,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiversityAnalyzer {
    config: DiversityConfig,
}

impl DiversityAnalyzer {
    pub fn new(config: DiversityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiversityConfig {
        &self.config
    }

    /// Analyze how much the evaluations disagree.
    ///
    /// The reasoning component only takes part when at least two evaluations
    /// carry reasoning; otherwise its weight is dropped from the mean.
    pub fn analyze_diversity(&self, evaluations: &[EvaluationResult]) -> DiversityAnalysis {
        let n = evaluations.len();
        if n == 0 || n < self.config.min_evaluations {
            return DiversityAnalysis::neutral(n);
        }

        let scores: Vec<f64> = evaluations.iter().map(|e| e.score).collect();
        let confidences: Vec<f64> = evaluations.iter().map(|e| e.confidence).collect();

        let entropy = self.score_entropy(&scores);
        let max_entropy = (self.config.bins.min(n) as f64).log2();
        let score_component = if max_entropy > 0.0 {
            (entropy / max_entropy).min(1.0)
        } else {
            0.0
        };

        let confidence_component =
            (variance(&confidences).sqrt() / MAX_CONFIDENCE_SPREAD).min(1.0);

        let mut weighted = self.config.score_weight * score_component
            + self.config.confidence_weight * confidence_component;
        let mut total_weight = self.config.score_weight + self.config.confidence_weight;
        if let Some(reasoning_component) = reasoning_dissimilarity(evaluations) {
            weighted += self.config.reasoning_weight * reasoning_component;
            total_weight += self.config.reasoning_weight;
        }

        let overall_score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let score_variance = variance(&scores);
        let groupthink_detected = overall_score < self.config.groupthink_threshold;
        if groupthink_detected {
            tracing::debug!(
                overall = overall_score,
                samples = n,
                "Evaluations show groupthink"
            );
        }

        DiversityAnalysis {
            overall_score,
            entropy,
            variance: score_variance,
            disagreement_level: (4.0 * score_variance).min(1.0),
            groupthink_detected,
            confidence: 1.0 - (-(n as f64) / 10.0).exp(),
            sample_size: n,
        }
    }

    fn score_entropy(&self, scores: &[f64]) -> f64 {
        let bins = self.config.bins.max(1);
        let mut histogram: BTreeMap<usize, usize> = BTreeMap::new();
        for score in scores {
            let bucket = ((score.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1);
            *histogram.entry(bucket).or_insert(0) += 1;
        }

        let total = scores.len() as f64;
        histogram
            .values()
            .map(|count| {
                let p = *count as f64 / total;
                -p * p.log2()
            })
            .sum()
    }
}

/// Mean pairwise Jaccard distance between reasoning word sets.
fn reasoning_dissimilarity(evaluations: &[EvaluationResult]) -> Option<f64> {
    let word_sets: Vec<HashSet<String>> = evaluations
        .iter()
        .filter_map(|e| e.reasoning.as_deref())
        .filter(|text| !text.trim().is_empty())
        .map(words)
        .collect();

    if word_sets.len() < 2 {
        return None;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in word_sets.iter().enumerate() {
        for b in &word_sets[i + 1..] {
            total += jaccard_distance(a, b);
            pairs += 1;
        }
    }
    Some(total / pairs as f64)
}

fn words(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn jaccard_distance(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    1.0 - a.intersection(b).count() as f64 / union as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
