//! Capability contracts for the decision space being searched.
//!
//! The search never interprets states or actions itself. It only asks a
//! state for its valid actions, applies them to obtain new states, and hands
//! states to agents for evaluation.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// An action that can be applied to a [`State`].
pub trait Action: Clone + Debug + PartialEq + Send + Sync {
    /// Stable identifier, used as the key for the child map.
    type Id: Clone + Debug + Eq + Ord + Hash + Send + Sync;

    /// Identifier of this action.
    fn id(&self) -> Self::Id;

    /// Cost of taking this action (domain-defined, informational).
    fn cost(&self) -> f64 {
        0.0
    }
}

/// A snapshot of the decision problem.
///
/// `apply_action` must be pure: it returns a new state and leaves `self`
/// untouched, since the tree keeps every intermediate snapshot.
pub trait State: Clone + Debug + Send + Sync {
    type Action: Action;
    type Player: Clone + Debug + PartialEq + Send + Sync;

    /// Whether no further actions can be taken.
    fn is_terminal(&self) -> bool;

    /// The participant to act in this state.
    fn current_player(&self) -> Self::Player;

    /// All actions that may be applied to this state.
    fn valid_actions(&self) -> Vec<Self::Action>;

    /// Apply an action, returning the resulting state.
    fn apply_action(&self, action: &Self::Action) -> Self;

    /// Key identifying equivalent states (transpositions share a key).
    fn hash_key(&self) -> String;

    /// Numeric features describing the state, for evaluators that want them.
    fn features(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}
