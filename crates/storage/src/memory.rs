//! In-memory origin store.
//!
//! A [`MemoryOrigin`] is the shared backing map of one application origin.
//! Each tab attaches with [`MemoryOrigin::context`] and receives a
//! [`MemoryStore`] handle; writes through one handle are broadcast as
//! [`StorageEvent`]s to every other handle's [`StorageWatch`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{ContextId, KvStore, ObservableStore, Result, StorageEvent, StorageWatch, StoreError};

/// Capacity of the storage event fan-out.
const EVENT_CAPACITY: usize = 256;

struct OriginInner {
	entries: Mutex<HashMap<String, String>>,
	quota: Option<usize>,
	available: bool,
	events: broadcast::Sender<StorageEvent>,
	next_context: AtomicU64,
}

/// Shared in-memory storage for one application origin.
#[derive(Clone)]
pub struct MemoryOrigin {
	inner: Arc<OriginInner>,
}

impl Default for MemoryOrigin {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for MemoryOrigin {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryOrigin")
			.field("entries", &self.inner.entries.lock().len())
			.field("quota", &self.inner.quota)
			.field("available", &self.inner.available)
			.finish()
	}
}

impl MemoryOrigin {
	/// Creates an empty, unlimited origin.
	pub fn new() -> Self {
		Self::build(None, true)
	}

	/// Creates an origin that rejects writes once the stored keys and values
	/// together exceed `bytes`.
	pub fn with_quota(bytes: usize) -> Self {
		Self::build(Some(bytes), true)
	}

	/// Creates an origin whose storage is disabled: reads miss, writes fail.
	pub fn disabled() -> Self {
		Self::build(None, false)
	}

	fn build(quota: Option<usize>, available: bool) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			inner: Arc::new(OriginInner {
				entries: Mutex::new(HashMap::new()),
				quota,
				available,
				events,
				next_context: AtomicU64::new(1),
			}),
		}
	}

	/// Attaches a new execution context to this origin.
	pub fn context(&self) -> MemoryStore {
		let id = ContextId(self.inner.next_context.fetch_add(1, Ordering::Relaxed));
		trace!(context = id.0, "storage.memory.attach");
		MemoryStore {
			origin: Arc::clone(&self.inner),
			id,
		}
	}

	/// Returns the number of stored entries.
	pub fn len(&self) -> usize {
		self.inner.entries.lock().len()
	}

	/// Returns true when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// One context's handle onto a [`MemoryOrigin`].
#[derive(Clone)]
pub struct MemoryStore {
	origin: Arc<OriginInner>,
	id: ContextId,
}

impl std::fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryStore").field("context", &self.id.0).finish()
	}
}

impl MemoryStore {
	/// Returns this handle's context id.
	pub fn context_id(&self) -> ContextId {
		self.id
	}

	fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
		// No receivers is the normal single-tab case.
		let _ = self.origin.events.send(StorageEvent {
			origin: self.id,
			key: key.to_string(),
			old_value,
			new_value,
		});
	}
}

impl KvStore for MemoryStore {
	fn get(&self, key: &str) -> Option<String> {
		if !self.origin.available {
			return None;
		}
		self.origin.entries.lock().get(key).cloned()
	}

	fn keys(&self) -> Vec<String> {
		if !self.origin.available {
			return Vec::new();
		}
		let mut keys: Vec<String> = self.origin.entries.lock().keys().cloned().collect();
		keys.sort_unstable();
		keys
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		if !self.origin.available {
			return Err(StoreError::Unavailable);
		}

		let mut entries = self.origin.entries.lock();
		if let Some(limit) = self.origin.quota {
			let used: usize = entries
				.iter()
				.filter(|(k, _)| k.as_str() != key)
				.map(|(k, v)| k.len() + v.len())
				.sum();
			let needed = used + key.len() + value.len();
			if needed > limit {
				warn!(key, needed, limit, "storage.quota_exceeded");
				return Err(StoreError::QuotaExceeded {
					key: key.to_string(),
					needed,
					limit,
				});
			}
		}

		let old = entries.insert(key.to_string(), value.to_string());
		drop(entries);

		if old.as_deref() != Some(value) {
			trace!(context = self.id.0, key, "storage.memory.set");
			self.publish(key, old, Some(value.to_string()));
		}
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<()> {
		if !self.origin.available {
			return Err(StoreError::Unavailable);
		}

		let old = self.origin.entries.lock().remove(key);
		if old.is_some() {
			trace!(context = self.id.0, key, "storage.memory.remove");
			self.publish(key, old, None);
		}
		Ok(())
	}
}

impl ObservableStore for MemoryStore {
	fn watch(&self) -> StorageWatch {
		StorageWatch::new(self.origin.events.subscribe(), self.id)
	}
}
