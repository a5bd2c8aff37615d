//! Durable key/value storage shared by every tab of one application origin.
//!
//! The storage primitive itself is an external collaborator; this crate only
//! pins down its contract and ships what the rest of the workspace needs
//! around it:
//! * [`KvStore`]: synchronous, fallible get/set/remove plus key listing over string keys
//! * [`ObservableStore`]: a store that reports writes made by *other* contexts
//! * [`Namespace`]: the fixed application prefix applied to every key
//! * [`MemoryOrigin`]: an in-memory origin with per-tab handles, quota and
//!   availability switches, used by tests and the demo binary
//! * JSON helpers and the one-shot legacy key migration
//! * namespace maintenance: listing, clearing, usage stats, export/import
//!   and quota recovery

#![warn(missing_docs)]

use std::sync::Arc;

use tokio::sync::broadcast;

pub mod error;
pub mod json;
pub mod maintenance;
pub mod memory;
pub mod migrate;
pub mod namespace;

pub use error::{Result, StoreError};
pub use json::{get_json, probe_available, set_json};
pub use maintenance::{Export, ImportReport, StorageStats, clear, export, import, namespaced_keys, recover_quota, stats};
pub use memory::{MemoryOrigin, MemoryStore};
pub use migrate::{MigrationReport, migrate_legacy};
pub use namespace::Namespace;

/// Synchronous string key/value store.
///
/// Every operation may fail (quota, disabled storage). Callers must tolerate
/// `get` returning `None` for a key that was set moments earlier.
pub trait KvStore: Send + Sync {
	/// Reads the raw value stored under `key`.
	fn get(&self, key: &str) -> Option<String>;

	/// Lists every stored key. An unavailable store lists nothing.
	fn keys(&self) -> Vec<String>;

	/// Writes `value` under `key`.
	fn set(&self, key: &str, value: &str) -> Result<()>;

	/// Removes `key`. Removing a missing key is not an error.
	fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
	fn get(&self, key: &str) -> Option<String> {
		(**self).get(key)
	}

	fn keys(&self) -> Vec<String> {
		(**self).keys()
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		(**self).set(key, value)
	}

	fn remove(&self, key: &str) -> Result<()> {
		(**self).remove(key)
	}
}

/// Identifies one execution context attached to a shared origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// A mutation observed on the shared origin.
///
/// Mirrors the browser `storage` event: `new_value` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
	/// Context that performed the write.
	pub origin: ContextId,
	/// Key that changed.
	pub key: String,
	/// Value before the mutation.
	pub old_value: Option<String>,
	/// Value after the mutation.
	pub new_value: Option<String>,
}

/// A store whose peers can observe its mutations.
pub trait ObservableStore: KvStore {
	/// Subscribes to mutations performed by other contexts.
	fn watch(&self) -> StorageWatch;
}

impl<T: ObservableStore + ?Sized> ObservableStore for Arc<T> {
	fn watch(&self) -> StorageWatch {
		(**self).watch()
	}
}

/// Receiver half of a storage subscription.
///
/// Events written by the subscribing context are skipped, so a tab never
/// observes its own writes.
#[derive(Debug)]
pub struct StorageWatch {
	rx: broadcast::Receiver<StorageEvent>,
	local: ContextId,
}

impl StorageWatch {
	/// Wraps a raw event receiver for the context `local`.
	pub fn new(rx: broadcast::Receiver<StorageEvent>, local: ContextId) -> Self {
		Self { rx, local }
	}

	/// Waits for the next foreign mutation. Returns `None` once the origin is gone.
	pub async fn recv(&mut self) -> Option<StorageEvent> {
		loop {
			match self.rx.recv().await {
				Ok(event) if event.origin == self.local => continue,
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, context = self.local.0, "storage.watch.lagged");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}
}
