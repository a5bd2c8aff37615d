//! Error types for the state store.

use thiserror::Error;

/// Errors surfaced by [`StateManager`](crate::StateManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
	/// `select` was called with a name that was never registered.
	#[error("selector \"{0}\" not found")]
	SelectorNotFound(String),
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
