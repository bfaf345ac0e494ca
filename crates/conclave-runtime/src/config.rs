//! Runtime configuration.
//!
//! Everything is loadable from YAML or JSON through
//! [`ConfigFile`](conclave_core::ConfigFile). Durations are written in
//! human-readable form (`"250ms"`, `"30s"`, `"1h"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use conclave_core::config::{ensure_non_negative, ensure_unit};
use conclave_core::{ConfigError, ConfigFile, SelectionStrategy, SentinelConfig};

use crate::agents::CacheConfig;
use crate::resilience::CircuitBreakerConfig;

/// Settings for one search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on loop iterations
    pub max_iterations: usize,

    /// Wall-clock budget, checked before every iteration
    #[serde(with = "humantime_option")]
    pub time_limit: Option<Duration>,

    /// UCB1 exploration constant `c`
    pub exploration_constant: f64,

    /// Expand `ceil(sqrt(visits + 1))` actions at once instead of one
    pub progressive_widening: bool,

    pub early_termination: EarlyTermination,

    /// Accepted for compatibility; evaluations run one at a time
    pub parallelism: usize,

    /// Seed for the expansion RNG; entropy when absent
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            time_limit: None,
            exploration_constant: std::f64::consts::SQRT_2,
            progressive_widening: true,
            early_termination: EarlyTermination::default(),
            parallelism: 1,
            seed: None,
        }
    }
}

impl SearchConfig {
    /// Create a config running exactly `max_iterations` iterations.
    pub fn with_iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        ensure_non_negative("exploration_constant", self.exploration_constant)?;
        if self.parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        ensure_unit(
            "confidence_threshold",
            self.early_termination.confidence_threshold,
        )?;
        ensure_non_negative("score_difference", self.early_termination.score_difference)?;
        Ok(())
    }
}

/// When a search may stop before its iteration budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyTermination {
    pub enabled: bool,

    /// Iterations that must run before any early stop
    pub min_simulations: usize,

    /// Stop once the leading move's confidence reaches this
    pub confidence_threshold: f64,

    /// Stop once the top two moves' average rewards differ by this much
    pub score_difference: f64,
}

impl Default for EarlyTermination {
    fn default() -> Self {
        Self {
            enabled: true,
            min_simulations: 100,
            confidence_threshold: 0.95,
            score_difference: 0.3,
        }
    }
}

impl EarlyTermination {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Full configuration of a [`DecisionOrchestrator`](crate::DecisionOrchestrator).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub search: SearchConfig,

    /// How agents are picked for new nodes
    pub selection: SelectionStrategy,

    /// Seed for the selector RNG; entropy when absent
    pub selector_seed: Option<u64>,

    pub sentinel: SentinelConfig,

    /// Wrap every agent in a circuit breaker
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Wrap every agent in an evaluation cache
    pub cache: Option<CacheConfig>,
}

impl ConfigFile for RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()?;
        self.sentinel.validate()?;
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as a humantime string.
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` as a humantime string.
pub(crate) mod humantime_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
