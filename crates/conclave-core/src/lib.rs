//! # conclave-core
//!
//! Deterministic building blocks for multi-agent tree search.
//!
//! This crate holds everything that does not need to wait on an agent:
//! - The arena search tree and its UCB1 / recommendation rules
//! - Agent selection strategies with performance tracking
//! - The sentinel: bias detection and diversity analysis
//!
//! ## Key Guarantees
//!
//! 1. **Synchronous**: No I/O and no async; the runtime crate drives agents
//! 2. **Seedable**: Randomized selection takes an explicit seed for replay
//! 3. **Advisory auditing**: The sentinel never mutates search statistics
//!
//! ## Example
//!
//! ```rust,ignore
//! use conclave_core::{SentinelAgent, SentinelConfig, SentinelContext, Tree};
//!
//! let tree = Tree::new(initial_state);
//! // ... searched by conclave-runtime ...
//! let sentinel = SentinelAgent::new(SentinelConfig::default());
//! let audit = sentinel.evaluate(&SentinelContext::from_tree(&tree, tree.root_id()));
//!
//! for recommendation in &audit.recommendations {
//!     println!("{}", recommendation);
//! }
//! ```

pub mod config;
pub mod domain;
pub mod selector;
pub mod sentinel;
pub mod tree;
pub mod types;

// Re-export main types at crate root
pub use config::{ConfigError, ConfigFile};
pub use domain::{Action, State};
pub use selector::{AgentSelector, SelectionContext, SelectionStrategy, SelectorError};
pub use sentinel::{
    BiasDetector, BiasDetectorConfig, BiasReport, BiasType, ChildSummary, DiversityAnalysis,
    DiversityAnalyzer, DiversityConfig, SentinelAgent, SentinelConfig, SentinelContext,
    SentinelEvaluation, SentinelMemory,
};
pub use tree::{ActionId, NodeId, Tree, TreeNode, TreeStatistics};
pub use types::{AgentId, EvaluationResult, EvaluationSample};
