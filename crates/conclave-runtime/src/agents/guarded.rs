//! Agent wrapper enforcing a circuit breaker and optional call timeout.

use async_trait::async_trait;
use conclave_core::{AgentId, EvaluationResult, State};
use std::sync::Arc;

use super::traits::{Agent, AgentError};
use crate::resilience::CircuitBreaker;

/// Fails fast while the wrapped agent's circuit is open.
///
/// The breaker is shared, so a pool of guarded agents can use one
/// [`CircuitBreaker`] with a circuit per agent id.
pub struct CircuitBreakingAgent<S: State> {
    inner: Arc<dyn Agent<S>>,
    breaker: Arc<CircuitBreaker>,
}

impl<S: State> CircuitBreakingAgent<S> {
    pub fn new(inner: Arc<dyn Agent<S>>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<S: State + 'static> Agent<S> for CircuitBreakingAgent<S> {
    fn id(&self) -> &AgentId {
        self.inner.id()
    }

    async fn evaluate(&self, state: &S) -> Result<EvaluationResult, AgentError> {
        let id = self.inner.id();
        let permit = self
            .breaker
            .try_acquire(id)
            .ok_or_else(|| AgentError::CircuitOpen(id.clone()))?;

        let outcome = match self.breaker.config().call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.evaluate(state))
                .await
                .unwrap_or(Err(AgentError::Timeout(limit))),
            None => self.inner.evaluate(state).await,
        };

        match &outcome {
            Ok(_) => permit.success(),
            Err(e) => {
                tracing::debug!(
                    agent = %id,
                    trial = permit.is_trial(),
                    error = %e,
                    "Guarded evaluation failed"
                );
                permit.failure();
            }
        }
        outcome
    }

    async fn is_ready(&self) -> bool {
        !self.breaker.is_open(self.inner.id()) && self.inner.is_ready().await
    }
}
