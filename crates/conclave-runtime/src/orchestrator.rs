//! Decision orchestrator: search followed by a sentinel audit.
//!
//! The orchestrator owns everything that outlives a single decision:
//! - The agent pool (wrapped in cache / circuit breaker when configured)
//! - The agent selector and its performance averages
//! - The sentinel and its memory of earlier audits
//!
//! Each call to [`DecisionOrchestrator::decide`] builds a fresh tree.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use conclave_core::{
    AgentId, AgentSelector, ConfigFile, SentinelAgent, SentinelContext, SentinelEvaluation,
    SentinelMemory, State, Tree,
};

use crate::agents::{Agent, CachingAgent, CircuitBreakingAgent};
use crate::config::RuntimeConfig;
use crate::resilience::CircuitBreaker;
use crate::search::{SearchAlgorithm, SearchResult};
use crate::RuntimeError;

/// A recommendation together with the audit of how it was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision<A> {
    pub search: SearchResult<A>,
    pub audit: SentinelEvaluation,
}

impl<A> Decision<A> {
    /// Whether the audit found nothing to worry about.
    pub fn is_trusted(&self) -> bool {
        !self.audit.bias_detected
    }
}

/// Runs searches over a fixed agent pool and audits each one.
pub struct DecisionOrchestrator<S: State> {
    agents: Vec<Arc<dyn Agent<S>>>,
    selector: AgentSelector,
    search: SearchAlgorithm,
    sentinel: SentinelAgent,
    memory: SentinelMemory,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl<S: State + 'static> DecisionOrchestrator<S> {
    pub fn builder() -> DecisionOrchestratorBuilder<S> {
        DecisionOrchestratorBuilder::new()
    }

    /// Search from `root_state`, then audit the evaluations behind the result.
    pub async fn decide(&mut self, root_state: S) -> Result<Decision<S::Action>, RuntimeError> {
        let mut tree = Tree::new(root_state);
        let search = self
            .search
            .search(&mut tree, &self.agents, &mut self.selector)
            .await?;

        let context = SentinelContext::from_tree(&tree, tree.root_id());
        let memory = std::mem::take(&mut self.memory);
        let (audit, memory) = self.sentinel.evaluate_with_memory(&context, memory);
        self.memory = memory;

        if audit.bias_detected {
            tracing::warn!(
                reports = audit.bias_reports.len(),
                diversity = audit.diversity_score,
                "Decision audit flagged the agent pool"
            );
        }
        tracing::info!(
            best_score = search.best_score,
            confidence = search.confidence,
            audit_confidence = audit.confidence,
            "Decision complete"
        );

        Ok(Decision { search, audit })
    }

    /// Feed an observed outcome into the selector's performance average.
    pub fn record_performance(&mut self, agent: &AgentId, score: f64) {
        self.selector.update_performance(agent, score);
    }

    pub fn agents(&self) -> &[Arc<dyn Agent<S>>] {
        &self.agents
    }

    pub fn selector(&self) -> &AgentSelector {
        &self.selector
    }

    pub fn memory(&self) -> &SentinelMemory {
        &self.memory
    }

    /// Shared circuit breaker, when one is configured.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }
}

/// Builder for DecisionOrchestrator.
pub struct DecisionOrchestratorBuilder<S: State> {
    config: RuntimeConfig,
    agents: Vec<Arc<dyn Agent<S>>>,
}

impl<S: State + 'static> DecisionOrchestratorBuilder<S> {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            agents: Vec::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an agent.
    pub fn agent(mut self, agent: Arc<dyn Agent<S>>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Validate the configuration and assemble the orchestrator.
    pub fn build(self) -> Result<DecisionOrchestrator<S>, RuntimeError> {
        self.config.validate()?;
        if self.agents.is_empty() {
            return Err(RuntimeError::NoAgentsRegistered);
        }

        let breaker = self
            .config
            .circuit_breaker
            .clone()
            .map(|config| Arc::new(CircuitBreaker::new(config)));

        let agents = self
            .agents
            .into_iter()
            .map(|agent| {
                let agent = match &breaker {
                    Some(breaker) => Arc::new(CircuitBreakingAgent::new(agent, breaker.clone()))
                        as Arc<dyn Agent<S>>,
                    None => agent,
                };
                match &self.config.cache {
                    Some(cache) => Arc::new(CachingAgent::new(agent, cache)) as Arc<dyn Agent<S>>,
                    None => agent,
                }
            })
            .collect();

        let selector = match self.config.selector_seed {
            Some(seed) => AgentSelector::with_seed(self.config.selection, seed),
            None => AgentSelector::new(self.config.selection),
        };

        Ok(DecisionOrchestrator {
            agents,
            selector,
            search: SearchAlgorithm::new(self.config.search),
            sentinel: SentinelAgent::new(self.config.sentinel),
            memory: SentinelMemory::default(),
            breaker,
        })
    }
}

impl<S: State + 'static> Default for DecisionOrchestratorBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
