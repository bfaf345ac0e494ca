//! Caching layer for agent evaluations.
//!
//! Transpositions (the same state reached through different action orders)
//! share a `hash_key`, so a cached evaluation saves a full agent call.

use async_trait::async_trait;
use conclave_core::{AgentId, ConfigError, EvaluationResult, State};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::traits::{Agent, AgentError};
use crate::config::humantime_duration;

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached evaluations per agent
    pub max_entries: u64,

    /// How long an evaluation stays valid
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "cache max_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Agent wrapper that remembers successful evaluations by state key.
///
/// Failures are never cached; the next call for that state reaches the
/// inner agent again.
pub struct CachingAgent<S: State> {
    inner: Arc<dyn Agent<S>>,
    cache: Cache<String, EvaluationResult>,
}

impl<S: State> CachingAgent<S> {
    pub fn new(inner: Arc<dyn Agent<S>>, config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self { inner, cache }
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of cached evaluations.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl<S: State + 'static> Agent<S> for CachingAgent<S> {
    fn id(&self) -> &AgentId {
        self.inner.id()
    }

    async fn evaluate(&self, state: &S) -> Result<EvaluationResult, AgentError> {
        let key = state.hash_key();
        if let Some(hit) = self.cache.get(&key).await {
            tracing::trace!(agent = %self.id(), key = %key, "Evaluation cache hit");
            return Ok(hit);
        }

        let evaluation = self.inner.evaluate(state).await?;
        self.cache.insert(key, evaluation.clone()).await;
        Ok(evaluation)
    }

    async fn is_ready(&self) -> bool {
        self.inner.is_ready().await
    }
}
