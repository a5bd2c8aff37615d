//! Error types for storage access.

use thiserror::Error;

/// Errors a store write may report.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Storage is disabled or otherwise unreachable.
	#[error("storage is unavailable")]
	Unavailable,

	/// The write would exceed the origin's byte quota.
	#[error("storage quota exceeded writing {key}: {needed} bytes needed, limit {limit}")]
	QuotaExceeded {
		/// Key being written.
		key: String,
		/// Total bytes the origin would hold after the write.
		needed: usize,
		/// Configured byte limit.
		limit: usize,
	},

	/// A value could not be encoded before writing.
	#[error("failed to encode value for {key}: {error}")]
	Encode {
		/// Key being written.
		key: String,
		/// The underlying encoder error.
		#[source]
		error: serde_json::Error,
	},
}

impl StoreError {
	/// True if the store is full rather than unusable.
	pub fn is_quota_exceeded(&self) -> bool {
		matches!(self, StoreError::QuotaExceeded { .. })
	}
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
