//! Resilience patterns for agent calls.
//!
//! Agents are remote and unreliable. The circuit breaker keeps a failing
//! agent from slowing every iteration of a search; the search itself only
//! ever sees an error and scores it as zero.

mod circuit_breaker;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
