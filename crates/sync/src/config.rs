//! Sync layer configuration.

use std::time::Duration;

use lft_storage::Namespace;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default name of the broadcast channel shared by every tab.
pub const DEFAULT_CHANNEL: &str = "lft_v2_sync";

/// Default delay between a leader claim and reading the claim record.
pub const DEFAULT_SETTLE_WINDOW_MS: u64 = 100;

/// Default wait for a leader's answer to an initial sync request.
pub const DEFAULT_INITIAL_SYNC_TIMEOUT_MS: u64 = 1000;

/// Keys registered for propagation at construction.
pub const DEFAULT_SYNC_KEYS: &[&str] = &["pins", "collections", "theme", "viewMode", "votes"];

/// Settings for one [`SyncManager`](crate::SyncManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Prefix of every durable key the manager touches.
	pub namespace: Namespace,
	/// Broadcast channel name.
	pub channel: String,
	/// Election settle window in milliseconds.
	pub settle_window_ms: u64,
	/// Initial sync timeout in milliseconds.
	pub initial_sync_timeout_ms: u64,
	/// Keys eligible for propagation from the start.
	pub default_sync_keys: Vec<String>,
	/// Buffered [`SyncEvent`](crate::SyncEvent)s per subscriber.
	pub event_capacity: usize,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			namespace: Namespace::default(),
			channel: DEFAULT_CHANNEL.to_string(),
			settle_window_ms: DEFAULT_SETTLE_WINDOW_MS,
			initial_sync_timeout_ms: DEFAULT_INITIAL_SYNC_TIMEOUT_MS,
			default_sync_keys: DEFAULT_SYNC_KEYS.iter().map(|k| k.to_string()).collect(),
			event_capacity: 64,
		}
	}
}

impl SyncConfig {
	/// Parses and validates a TOML document. Missing fields take their defaults.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Rejects values the election and initial sync cannot work with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.namespace.as_str().is_empty() {
			return Err(ConfigError::Invalid {
				field: "namespace",
				reason: "must not be empty",
			});
		}
		if self.channel.is_empty() {
			return Err(ConfigError::Invalid {
				field: "channel",
				reason: "must not be empty",
			});
		}
		if self.settle_window_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "settle_window_ms",
				reason: "must be positive",
			});
		}
		if self.initial_sync_timeout_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "initial_sync_timeout_ms",
				reason: "must be positive",
			});
		}
		if self.event_capacity == 0 {
			return Err(ConfigError::Invalid {
				field: "event_capacity",
				reason: "must be positive",
			});
		}
		Ok(())
	}

	pub fn settle_window(&self) -> Duration {
		Duration::from_millis(self.settle_window_ms)
	}

	pub fn initial_sync_timeout(&self) -> Duration {
		Duration::from_millis(self.initial_sync_timeout_ms)
	}
}
