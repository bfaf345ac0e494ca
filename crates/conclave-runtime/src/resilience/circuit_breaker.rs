//! Circuit breaker to stop calling agents that keep failing.
//!
//! When an agent fails repeatedly its circuit opens and calls fail fast
//! until the recovery timeout passes. The search then scores those calls as
//! zero instead of waiting on a dead agent.

use conclave_core::{AgentId, ConfigError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{humantime_duration, humantime_option};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "humantime_duration")]
    pub recovery_timeout: Duration,

    /// Successes needed to close the circuit again
    pub success_threshold: u32,

    /// Per-call limit; a call exceeding it counts as a failure
    #[serde(with = "humantime_option")]
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit breaker thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// State of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, all calls fail fast
    Open { opened_at: Instant },

    /// Testing recovery, one trial call at a time
    HalfOpen { successes: u32, trial_in_flight: bool },
}

/// Per-agent circuit breaker.
///
/// Each agent has its own circuit so one failing agent never blocks the
/// rest of the pool. Calls go through [`CircuitBreaker::try_acquire`]; the
/// returned [`CallPermit`] reports the outcome.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: RwLock<HashMap<AgentId, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call for `agent` would be refused right now.
    ///
    /// Read-only: an open circuit past its recovery timeout reports closed
    /// but only moves to half-open once a call is admitted.
    pub fn is_open(&self, agent: &AgentId) -> bool {
        match self.states.read().get(agent) {
            Some(CircuitState::Open { opened_at }) => {
                opened_at.elapsed() < self.config.recovery_timeout
            }
            Some(CircuitState::HalfOpen {
                trial_in_flight, ..
            }) => *trial_in_flight,
            _ => false,
        }
    }

    /// Admit a call for `agent`, or `None` if the circuit refuses it.
    ///
    /// While half-open only one trial call is admitted; concurrent callers
    /// are refused until it settles.
    pub fn try_acquire(&self, agent: &AgentId) -> Option<CallPermit<'_>> {
        let mut states = self.states.write();
        let trial = match states.get(agent).cloned() {
            None | Some(CircuitState::Closed { .. }) => false,
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() < self.config.recovery_timeout {
                    return None;
                }
                tracing::info!(agent = %agent, "Circuit half-open, admitting trial call");
                states.insert(
                    agent.clone(),
                    CircuitState::HalfOpen {
                        successes: 0,
                        trial_in_flight: true,
                    },
                );
                true
            }
            Some(CircuitState::HalfOpen {
                trial_in_flight: true,
                ..
            }) => return None,
            Some(CircuitState::HalfOpen { successes, .. }) => {
                states.insert(
                    agent.clone(),
                    CircuitState::HalfOpen {
                        successes,
                        trial_in_flight: true,
                    },
                );
                true
            }
        };

        Some(CallPermit {
            breaker: self,
            agent: agent.clone(),
            trial,
            settled: false,
        })
    }

    /// Record a successful call.
    pub fn record_success(&self, agent: &AgentId) {
        let mut states = self.states.write();
        match states.get(agent).cloned() {
            Some(CircuitState::HalfOpen { successes, .. }) => {
                let successes = successes + 1;
                let next = if successes >= self.config.success_threshold {
                    tracing::info!(agent = %agent, successes, "Circuit closed, agent recovered");
                    CircuitState::Closed { failures: 0 }
                } else {
                    CircuitState::HalfOpen {
                        successes,
                        trial_in_flight: false,
                    }
                };
                states.insert(agent.clone(), next);
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(agent.clone(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    /// Record a failed call.
    ///
    /// A failed trial reopens the circuit and restarts the recovery timeout.
    pub fn record_failure(&self, agent: &AgentId) {
        let mut states = self.states.write();
        let failures = match states.get(agent) {
            None => 1,
            Some(CircuitState::Closed { failures }) => failures + 1,
            Some(CircuitState::HalfOpen { successes, .. }) => {
                tracing::warn!(
                    agent = %agent,
                    successes = *successes,
                    "Trial call failed, circuit reopened"
                );
                states.insert(
                    agent.clone(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        let next = if failures >= self.config.failure_threshold {
            tracing::warn!(agent = %agent, failures, "Circuit opened");
            CircuitState::Open {
                opened_at: Instant::now(),
            }
        } else {
            CircuitState::Closed { failures }
        };
        states.insert(agent.clone(), next);
    }

    /// Free the trial slot without counting an outcome.
    fn release_trial(&self, agent: &AgentId) {
        let mut states = self.states.write();
        if let Some(CircuitState::HalfOpen {
            trial_in_flight, ..
        }) = states.get_mut(agent)
        {
            *trial_in_flight = false;
        }
    }

    /// Current state of an agent's circuit.
    pub fn state(&self, agent: &AgentId) -> CircuitState {
        self.states
            .read()
            .get(agent)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

/// Admission of one call through a [`CircuitBreaker`].
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure).
/// A permit dropped unsettled (its call was cancelled) counts as neither and
/// frees the half-open trial slot.
#[derive(Debug)]
#[must_use = "settle the permit with success() or failure()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    agent: AgentId,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the half-open recovery trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(&self.agent);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(&self.agent);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial(&self.agent);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
