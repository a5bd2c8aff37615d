//! The state store.
//!
//! # Locking
//!
//! State and the selector cache live under one mutex so a cached selector
//! result can never outlive the write that invalidates it. Listeners are
//! invoked only after that mutex is released: they observe the updated
//! state and may write back into the store. Updaters passed to
//! [`StateManager::set_state`] and selector functions run under the mutex
//! and must not call back into the same store.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, trace};

use crate::state::{State, default_filters, default_state, slices};
use crate::value::Value;
use crate::{Result, StateError};

type StateListener = Arc<dyn Fn(&State, &[String]) + Send + Sync>;
type SliceListener = Arc<dyn Fn(&Value, &str) + Send + Sync>;
type Selector = Arc<dyn Fn(&State) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
	next_id: u64,
	global: IndexMap<ListenerId, StateListener>,
	slices: HashMap<String, IndexMap<ListenerId, SliceListener>>,
}

impl Listeners {
	fn next_id(&mut self) -> ListenerId {
		self.next_id += 1;
		ListenerId(self.next_id)
	}
}

struct Store {
	state: State,
	cache: HashMap<String, Arc<Value>>,
}

struct Inner {
	store: Mutex<Store>,
	listeners: Mutex<Listeners>,
	selectors: RwLock<HashMap<String, Selector>>,
}

/// Central state container for one execution context.
///
/// Cloning yields another handle onto the same store.
#[derive(Clone)]
pub struct StateManager {
	inner: Arc<Inner>,
}

impl Default for StateManager {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for StateManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let slices = self.inner.store.lock().state.len();
		let (global, per_slice) = {
			let listeners = self.inner.listeners.lock();
			(listeners.global.len(), listeners.slices.len())
		};
		f.debug_struct("StateManager")
			.field("slices", &slices)
			.field("listeners", &global)
			.field("slice_listeners", &per_slice)
			.field("selectors", &self.inner.selectors.read().len())
			.finish()
	}
}

impl StateManager {
	/// Creates a store seeded with [`default_state`].
	pub fn new() -> Self {
		Self::with_state(default_state())
	}

	/// Creates a store seeded with `state`.
	pub fn with_state(state: State) -> Self {
		Self {
			inner: Arc::new(Inner {
				store: Mutex::new(Store {
					state,
					cache: HashMap::new(),
				}),
				listeners: Mutex::new(Listeners::default()),
				selectors: RwLock::new(HashMap::new()),
			}),
		}
	}

	/// Returns a deep, independent copy of the whole tree.
	pub fn get_state(&self) -> State {
		self.inner.store.lock().state.clone()
	}

	/// Returns an independent copy of one slice, or `Null` if it does not exist.
	pub fn get_slice(&self, key: &str) -> Value {
		self.read(|state| state.slice(key).cloned().unwrap_or_default())
	}

	/// Runs `f` against the live state.
	pub(crate) fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
		f(&self.inner.store.lock().state)
	}

	/// Applies a partial update computed from the live state.
	///
	/// The updater returns a record of slice name to new value. Any other
	/// value makes the call a no-op. Only slices whose value differs from the
	/// current one (by deep equality) are written and reported to listeners.
	pub fn set_state<F>(&self, updater: F)
	where
		F: FnOnce(&State) -> Value,
	{
		self.write("set_state", |state| {
			let Value::Record(updates) = updater(state) else {
				trace!("state.set_state.ignored");
				return Vec::new();
			};
			let mut changed = Vec::new();
			for (key, value) in updates {
				if state.slice(&key) != Some(&value) {
					state.insert(key.clone(), value);
					changed.push(key);
				}
			}
			changed
		});
	}

	/// Replaces one slice if the new value differs from the current one.
	pub fn set_slice(&self, key: &str, value: impl Into<Value>) {
		let value = value.into();
		self.write("set_slice", |state| {
			if state.slice(key) == Some(&value) {
				return Vec::new();
			}
			state.insert(key.to_string(), value);
			vec![key.to_string()]
		});
	}

	/// Writes a nested value at a dotted path such as `sync.theme`.
	///
	/// Intermediate records are created as needed. Listeners see the
	/// top-level slice as the changed key.
	pub fn set_path(&self, path: &str, value: impl Into<Value>) {
		let value = value.into();
		let Some((slice, rest)) = path.split_once('.') else {
			self.set_slice(path, value);
			return;
		};
		self.write("set_path", |state| {
			if state.slice_mut(slice).set_path(rest, value) {
				vec![slice.to_string()]
			} else {
				Vec::new()
			}
		});
	}

	/// Registers a listener invoked after every successful write with the
	/// full state and the changed slice names.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&State, &[String]) + Send + Sync + 'static,
	{
		let mut listeners = self.inner.listeners.lock();
		let id = listeners.next_id();
		listeners.global.insert(id, Arc::new(listener));
		Subscription {
			inner: Arc::downgrade(&self.inner),
			id,
			slice: None,
		}
	}

	/// Registers a listener invoked with the new value whenever slice `key` changes.
	pub fn subscribe_to_slice<F>(&self, key: &str, listener: F) -> Subscription
	where
		F: Fn(&Value, &str) + Send + Sync + 'static,
	{
		let mut listeners = self.inner.listeners.lock();
		let id = listeners.next_id();
		listeners
			.slices
			.entry(key.to_string())
			.or_default()
			.insert(id, Arc::new(listener));
		Subscription {
			inner: Arc::downgrade(&self.inner),
			id,
			slice: Some(key.to_string()),
		}
	}

	/// Total number of registered listeners.
	pub fn listener_count(&self) -> usize {
		let listeners = self.inner.listeners.lock();
		listeners.global.len() + listeners.slices.values().map(IndexMap::len).sum::<usize>()
	}

	/// Registers (or replaces) a derived-value selector.
	pub fn register_selector<F>(&self, name: impl Into<String>, selector: F)
	where
		F: Fn(&State) -> Value + Send + Sync + 'static,
	{
		let name = name.into();
		self.inner.selectors.write().insert(name.clone(), Arc::new(selector));
		self.inner.store.lock().cache.remove(&name);
	}

	/// Evaluates a registered selector, returning the cached result when no
	/// write happened since the last evaluation.
	pub fn select(&self, name: &str) -> Result<Arc<Value>> {
		let selector = self
			.inner
			.selectors
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| StateError::SelectorNotFound(name.to_string()))?;

		let mut store = self.inner.store.lock();
		if let Some(hit) = store.cache.get(name) {
			return Ok(Arc::clone(hit));
		}
		let result = Arc::new(selector(&store.state));
		store.cache.insert(name.to_string(), Arc::clone(&result));
		trace!(name, "state.select.miss");
		Ok(result)
	}

	/// Restores every slice except `user` to its default and notifies as if
	/// every slice changed.
	pub fn reset(&self) {
		self.write("reset", |state| {
			let user = state.slice(slices::USER).cloned();
			let mut fresh = default_state();
			if let Some(user) = user {
				fresh.insert(slices::USER.to_string(), user);
			}
			*state = fresh;
			state.keys().map(str::to_string).collect()
		});
	}

	/// Restores the `filters` slice to its default.
	pub fn reset_filters(&self) {
		self.set_slice(slices::FILTERS, default_filters());
	}

	/// Runs a mutation and, if it reports changed slices, drops the selector
	/// cache and notifies listeners after releasing the lock.
	fn write<F>(&self, op: &'static str, mutate: F)
	where
		F: FnOnce(&mut State) -> Vec<String>,
	{
		let pending = {
			let mut store = self.inner.store.lock();
			let changed = mutate(&mut store.state);
			if changed.is_empty() {
				trace!(op, "state.write.unchanged");
				return;
			}
			store.cache.clear();
			self.collect(&store.state, changed)
		};
		trace!(op, changed = ?pending.changed, "state.write");
		pending.dispatch();
	}

	fn collect(&self, state: &State, changed: Vec<String>) -> Pending {
		let listeners = self.inner.listeners.lock();
		let global: Vec<StateListener> = listeners.global.values().cloned().collect();
		let snapshot = (!global.is_empty()).then(|| state.clone());
		let bound_slices = changed
			.iter()
			.filter_map(|key| {
				let bound = listeners.slices.get(key)?;
				let value = state.slice(key).cloned().unwrap_or_default();
				Some((key.clone(), value, bound.values().cloned().collect()))
			})
			.collect();
		Pending {
			changed,
			snapshot,
			global,
			slices: bound_slices,
		}
	}
}

/// Listeners captured at write time, invoked outside the store lock.
struct Pending {
	changed: Vec<String>,
	snapshot: Option<State>,
	global: Vec<StateListener>,
	slices: Vec<(String, Value, Vec<SliceListener>)>,
}

impl Pending {
	fn dispatch(self) {
		if let Some(state) = &self.snapshot {
			for listener in &self.global {
				isolate(None, || listener(state, &self.changed));
			}
		}
		for (key, value, listeners) in &self.slices {
			for listener in listeners {
				isolate(Some(key.as_str()), || listener(value, key));
			}
		}
	}
}

/// Runs one listener, containing any panic so the rest of the pass proceeds.
fn isolate(slice: Option<&str>, f: impl FnOnce()) {
	if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
		error!(slice, panic = panic_message(payload.as_ref()), "state.listener_panicked");
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
	payload
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| payload.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("<non-string panic payload>")
}

/// Registration handle returned by [`StateManager::subscribe`] and
/// [`StateManager::subscribe_to_slice`].
///
/// Dropping the handle leaves the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
	inner: Weak<Inner>,
	id: ListenerId,
	slice: Option<String>,
}

impl Subscription {
	/// Removes the listener. Returns false if it was already gone.
	pub fn unsubscribe(self) -> bool {
		let Some(inner) = self.inner.upgrade() else {
			return false;
		};
		let mut listeners = inner.listeners.lock();
		match self.slice {
			None => listeners.global.shift_remove(&self.id).is_some(),
			Some(key) => {
				let Some(bound) = listeners.slices.get_mut(&key) else {
					return false;
				};
				let removed = bound.shift_remove(&self.id).is_some();
				if bound.is_empty() {
					listeners.slices.remove(&key);
				}
				removed
			}
		}
	}
}
