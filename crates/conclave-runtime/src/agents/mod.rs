//! Evaluating agents and decorators around them.
//!
//! An [`Agent`] is anything that can score a state. The decorators wrap an
//! agent without changing its identity, so the search and the sentinel see
//! the same agent id either way.

mod cached;
mod guarded;
mod traits;

pub use cached::{CacheConfig, CachingAgent};
pub use guarded::CircuitBreakingAgent;
pub use traits::{Agent, AgentError};
