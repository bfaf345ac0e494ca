//! Agent trait and common types.

use async_trait::async_trait;
use conclave_core::{AgentId, EvaluationResult, State};
use std::time::Duration;
use thiserror::Error;

/// Errors from evaluating agents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Circuit open for agent {0}")]
    CircuitOpen(AgentId),

    #[error("Agent not ready: {0}")]
    NotReady(AgentId),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// An evaluator of states.
///
/// Agents are typically slow and unreliable (remote models, heuristics
/// behind a network call). The search treats every call as fallible and
/// scores a failed evaluation as zero.
///
/// # Isolation Contract
/// - An agent only sees the state it is asked about
/// - Evaluations of the same state may differ between calls
/// - `evaluate` must not assume it is called in any particular order
#[async_trait]
pub trait Agent<S: State>: Send + Sync {
    /// Stable identifier; evaluations are keyed by it.
    fn id(&self) -> &AgentId;

    /// Evaluate a state.
    ///
    /// The returned score becomes the search reward unchanged.
    async fn evaluate(&self, state: &S) -> Result<EvaluationResult, AgentError>;

    /// Whether the agent can take calls right now.
    ///
    /// Checked once when a search starts; agents reporting `false` sit out
    /// that search.
    async fn is_ready(&self) -> bool {
        true
    }
}
