//! Error types for the sync layer.

use lft_storage::StoreError;
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
///
/// The sync manager logs and swallows these: delivery is best-effort.
#[derive(Debug, Error)]
pub enum TransportError {
	/// The transport was closed.
	#[error("transport closed")]
	Closed,

	/// A message could not be encoded for the wire.
	#[error("failed to encode sync message: {0}")]
	Encode(#[from] serde_json::Error),

	/// The durable store rejected the sentinel write.
	#[error("storage pulse failed: {0}")]
	Store(#[from] StoreError),
}

/// Errors that can occur when loading a [`SyncConfig`](crate::SyncConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A field holds a value the sync layer cannot run with.
	#[error("invalid value for {field}: {reason}")]
	Invalid {
		/// Name of the offending field.
		field: &'static str,
		/// What is wrong with it.
		reason: &'static str,
	},
}
