//! # conclave-runtime
//!
//! Async multi-agent Monte Carlo Tree Search.
//!
//! This crate drives the search described by `conclave-core`: it asks
//! agents (usually remote and slow) to evaluate states, feeds their scores
//! into the tree and audits the result with the sentinel.
//!
//! ## Important
//!
//! Agent calls are the only thing that ever waits. Tree updates, agent
//! selection and auditing are synchronous and live in `conclave-core`.
//!
//! Use the pieces directly when you manage trees yourself:
//! - [`SearchAlgorithm::search`] over a [`Tree`](conclave_core::Tree)
//! - [`CachingAgent`] / [`CircuitBreakingAgent`] around unreliable agents
//!
//! Or let [`DecisionOrchestrator`] wire them together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conclave_runtime::{DecisionOrchestrator, RuntimeConfig};
//! use conclave_core::ConfigFile;
//!
//! let config = RuntimeConfig::from_yaml_file("conclave.yaml")?;
//! let mut orchestrator = DecisionOrchestrator::builder()
//!     .config(config)
//!     .agent(Arc::new(strategist))
//!     .agent(Arc::new(critic))
//!     .build()?;
//!
//! let decision = orchestrator.decide(position).await?;
//! println!("play {:?} (confidence {:.2})", decision.search.best_action, decision.search.confidence);
//! if decision.audit.bias_detected {
//!     for note in &decision.audit.recommendations {
//!         println!("audit: {}", note);
//!     }
//! }
//! ```

pub mod agents;
pub mod config;
pub mod orchestrator;
pub mod resilience;
pub mod search;

pub use agents::{Agent, AgentError, CacheConfig, CachingAgent, CircuitBreakingAgent};
pub use config::{EarlyTermination, RuntimeConfig, SearchConfig};
pub use orchestrator::{Decision, DecisionOrchestrator, DecisionOrchestratorBuilder};
pub use resilience::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use search::{
    expansion_width, EvaluationFailure, PhaseTimings, SearchAlgorithm, SearchError, SearchPhase,
    SearchResult, SearchStatistics, TerminationReason,
};

use conclave_core::ConfigError;
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Search failed: {0}")]
    Search(#[from] SearchError),

    #[error("No agents registered")]
    NoAgentsRegistered,
}
