//! Shared value types: agent identity and evaluation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an evaluating agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single agent's judgment of a state.
///
/// Immutable once produced. The score is domain-normalized (canonically
/// `[0, 1]`) and is used as-is as the search reward; confidence and
/// reasoning are retained for auditing only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Value estimate for the evaluated state
    pub score: f64,

    /// How sure the agent is of the score (0.0 - 1.0)
    pub confidence: f64,

    /// Free-form justification, if the agent produced one
    #[serde(default)]
    pub reasoning: Option<String>,

    /// When the evaluation was produced
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Agent that produced this evaluation
    pub agent_id: AgentId,
}

impl EvaluationResult {
    /// Create an evaluation with no reasoning and no timestamp.
    ///
    /// Confidence is clamped into `[0, 1]`.
    pub fn new(agent_id: impl Into<AgentId>, score: f64, confidence: f64) -> Self {
        Self {
            score,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: None,
            timestamp: None,
            agent_id: agent_id.into(),
        }
    }

    /// Attach reasoning text.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Attach an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamp the evaluation with the current time.
    pub fn stamped_now(self) -> Self {
        self.with_timestamp(Utc::now())
    }
}

/// An evaluation together with where in the tree it was recorded.
///
/// The bias detector needs the depth for positional analysis; everything
/// else only looks at the evaluation itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSample {
    pub evaluation: EvaluationResult,

    /// Depth of the node the evaluation was recorded on (root = 0)
    pub depth: usize,
}

impl EvaluationSample {
    pub fn new(evaluation: EvaluationResult, depth: usize) -> Self {
        Self { evaluation, depth }
    }

    pub fn score(&self) -> f64 {
        self.evaluation.score
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.evaluation.agent_id
    }
}

impl From<EvaluationResult> for EvaluationSample {
    fn from(evaluation: EvaluationResult) -> Self {
        Self::new(evaluation, 0)
    }
}
