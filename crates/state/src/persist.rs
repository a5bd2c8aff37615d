//! Loading the `user`/`ui` subtrees from durable storage and writing them back.

use lft_storage::{KvStore, Namespace, get_json, recover_quota, set_json};
use tracing::{debug, warn};

use crate::manager::StateManager;
use crate::state::{default_sort, slices};
use crate::value::{Record, Value};

/// How a stored value replaces the default.
#[derive(Clone, Copy)]
enum Rule {
	/// Falsy or missing values fall back to the default.
	Falsy(fn() -> Value),
	/// Anything other than an explicit `false` is `true`.
	NotFalse,
	/// Only a stored record replaces the default.
	Record(fn() -> Value),
}

/// One durable key and where it lives in the tree.
struct Field {
	key: &'static str,
	slice: &'static str,
	/// `None` maps the key onto the whole slice.
	field: Option<&'static str>,
	rule: Rule,
}

const fn field(key: &'static str, slice: &'static str, field: &'static str, rule: Rule) -> Field {
	Field {
		key,
		slice,
		field: Some(field),
		rule,
	}
}

fn empty_list() -> Value {
	Value::List(Vec::new())
}

fn dark() -> Value {
	Value::from("dark")
}

fn grid() -> Value {
	Value::from("grid")
}

fn no() -> Value {
	Value::from(false)
}

const FIELDS: &[Field] = &[
	field("pinnedTools", slices::USER, "pinnedTools", Rule::Falsy(empty_list)),
	field("votes", slices::USER, "votes", Rule::Falsy(Value::record)),
	field("usage", slices::USER, "usage", Rule::Falsy(Value::record)),
	field("recentlyOpened", slices::USER, "recentlyOpened", Rule::Falsy(empty_list)),
	field("collections", slices::USER, "collections", Rule::Falsy(Value::record)),
	field("searchHistory", slices::USER, "searchHistory", Rule::Falsy(empty_list)),
	field("theme", slices::USER, "theme", Rule::Falsy(dark)),
	field("tourCompleted", slices::UI, "tourCompleted", Rule::Falsy(no)),
	field("analyticsEnabled", slices::UI, "analyticsEnabled", Rule::NotFalse),
	field("viewMode", slices::VIEW, "mode", Rule::Falsy(grid)),
	Field {
		key: "sortPreference",
		slice: slices::SORT,
		field: None,
		rule: Rule::Record(default_sort),
	},
];

impl Rule {
	fn resolve(self, stored: Option<Value>) -> Value {
		match self {
			Rule::Falsy(default) => stored.filter(Value::is_truthy).unwrap_or_else(default),
			Rule::NotFalse => Value::from(stored.and_then(|v| v.as_bool()) != Some(false)),
			Rule::Record(default) => stored.filter(|v| v.as_record().is_some()).unwrap_or_else(default),
		}
	}
}

/// Outcome of [`StateManager::persist`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistReport {
	/// Storage key names written successfully.
	pub written: Vec<&'static str>,
	/// Storage key names whose write failed.
	pub failed: Vec<&'static str>,
	/// History keys trimmed to make room after the store reported a full quota.
	pub trimmed: Vec<&'static str>,
}

impl PersistReport {
	pub fn is_complete(&self) -> bool {
		self.failed.is_empty()
	}
}

impl StateManager {
	/// Loads persisted user preferences into the tree.
	///
	/// Missing or undecodable keys fall back to their defaults. The result is
	/// merged through [`StateManager::set_state`], so listeners only hear about
	/// slices that actually changed.
	pub fn hydrate(&self, store: &(impl KvStore + ?Sized), ns: &Namespace) {
		let loaded: Vec<(&Field, Value)> = FIELDS
			.iter()
			.map(|f| (f, f.rule.resolve(get_json::<Value>(store, &ns.key(f.key)))))
			.collect();

		self.set_state(|state| {
			let mut updates = Record::new();
			for (f, value) in loaded {
				let slice = updates
					.entry(f.slice.to_string())
					.or_insert_with(|| state.slice(f.slice).cloned().unwrap_or_else(Value::record));
				match f.field {
					Some(name) => {
						slice.set_path(name, value);
					}
					None => *slice = value,
				}
			}
			Value::Record(updates)
		});
		debug!(ns = %ns, keys = FIELDS.len(), "state.hydrate");
	}

	/// Writes the persisted subset of the tree, one key per field.
	///
	/// Every write is attempted. The first write rejected for quota trims the
	/// stored histories and is retried once. Failures are logged and
	/// reported, never returned as errors.
	pub fn persist(&self, store: &(impl KvStore + ?Sized), ns: &Namespace) -> PersistReport {
		let values: Vec<(&'static str, Option<Value>)> = self.read(|state| {
			FIELDS
				.iter()
				.map(|f| {
					let value = match f.field {
						Some(name) => state.slice(f.slice).and_then(|s| s.get(name)),
						None => state.slice(f.slice),
					};
					(f.key, value.cloned())
				})
				.collect()
		});

		let mut report = PersistReport::default();
		let mut recovered = false;
		for (key, value) in values {
			let Some(value) = value else {
				continue;
			};
			let target = ns.key(key);
			let mut written = set_json(store, &target, &value);
			let full = matches!(&written, Err(error) if error.is_quota_exceeded());
			if full && !recovered {
				recovered = true;
				report.trimmed = recover_quota(store, ns);
				written = set_json(store, &target, &value);
			}
			match written {
				Ok(()) => report.written.push(key),
				Err(error) => {
					warn!(key, %error, "state.persist.write_failed");
					report.failed.push(key);
				}
			}
		}
		debug!(
			written = report.written.len(),
			failed = report.failed.len(),
			trimmed = report.trimmed.len(),
			"state.persist"
		);
		report
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	use lft_storage::MemoryOrigin;
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::state::default_state;

	#[test]
	fn test_hydrate_empty_store_keeps_defaults() {
		let store = MemoryOrigin::new().context();
		let state = StateManager::new();
		let notified = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&notified);
		let _ = state.subscribe(move |_, _| flag.store(true, Ordering::SeqCst));
		state.hydrate(&store, &Namespace::default());
		assert!(!notified.load(Ordering::SeqCst));
		assert_eq!(state.get_state(), default_state());
	}

	#[test]
	fn test_hydrate_reads_namespaced_keys() {
		let store = MemoryOrigin::new().context();
		let ns = Namespace::default();
		store.set(&ns.key("theme"), r#""light""#).unwrap();
		store.set(&ns.key("pinnedTools"), r#"["a","b"]"#).unwrap();
		store.set(&ns.key("analyticsEnabled"), "false").unwrap();
		store.set(&ns.key("viewMode"), r#""list""#).unwrap();
		store.set(&ns.key("sortPreference"), r#"{"field":"date","direction":"desc"}"#).unwrap();
		store.set(&ns.key("votes"), "not json").unwrap();

		let state = StateManager::new();
		state.set_path("user.votes", Value::from([("x", Value::from(1))]));
		state.hydrate(&store, &ns);

		let tree = state.get_state();
		assert_eq!(tree.get_path("user.theme"), Some(&Value::from("light")));
		assert_eq!(
			tree.get_path("user.pinnedTools"),
			Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
		);
		assert_eq!(tree.get_path("user.votes"), Some(&Value::record()));
		assert_eq!(tree.get_path("ui.analyticsEnabled"), Some(&Value::from(false)));
		assert_eq!(tree.get_path("ui.sidebarOpen"), Some(&Value::from(false)));
		assert_eq!(tree.get_path("view.mode"), Some(&Value::from("list")));
		assert_eq!(tree.get_path("view.focusedIndex"), Some(&Value::from(-1)));
		assert_eq!(tree.get_path("sort.direction"), Some(&Value::from("desc")));
	}

	#[test]
	fn test_analytics_only_disabled_by_explicit_false() {
		assert_eq!(Rule::NotFalse.resolve(None), Value::from(true));
		assert_eq!(Rule::NotFalse.resolve(Some(Value::from(0))), Value::from(true));
		assert_eq!(Rule::NotFalse.resolve(Some(Value::Null)), Value::from(true));
		assert_eq!(Rule::NotFalse.resolve(Some(Value::from(false))), Value::from(false));
	}

	#[test]
	fn test_falsy_values_fall_back() {
		assert_eq!(Rule::Falsy(dark).resolve(Some(Value::from(""))), Value::from("dark"));
		assert_eq!(Rule::Falsy(dark).resolve(Some(Value::from("light"))), Value::from("light"));
		assert_eq!(
			Rule::Record(default_sort).resolve(Some(Value::from("date"))),
			default_sort()
		);
	}

	#[test]
	fn test_persist_then_hydrate_restores_preferences() {
		let origin = MemoryOrigin::new();
		let ns = Namespace::default();
		let first = StateManager::new();
		first.set_path("user.theme", "light");
		first.set_path("ui.tourCompleted", true);
		let report = first.persist(&origin.context(), &ns);
		assert!(report.is_complete());
		assert_eq!(report.written.len(), FIELDS.len());

		let second = StateManager::new();
		second.hydrate(&origin.context(), &ns);
		assert_eq!(second.get_state().get_path("user.theme"), Some(&Value::from("light")));
		assert_eq!(
			second.get_state().get_path("ui.tourCompleted"),
			Some(&Value::from(true))
		);
	}

	#[test]
	fn test_persist_attempts_every_key_over_quota() {
		let store = MemoryOrigin::with_quota(64).context();
		let state = StateManager::new();
		let report = state.persist(&store, &Namespace::default());
		assert!(!report.failed.is_empty());
		assert_eq!(report.written.len() + report.failed.len(), FIELDS.len());
	}

	#[test]
	fn test_persist_trims_stored_histories_when_full() {
		let ns = Namespace::default();
		let store = MemoryOrigin::with_quota(413).context();
		let history: Vec<String> = (0..30).map(|i| format!("q{i:02}")).collect();
		set_json(&store, &ns.key("searchHistory"), &history).unwrap();
		set_json(&store, &ns.key("recentlyOpened"), &history).unwrap();

		let state = StateManager::new();
		let report = state.persist(&store, &ns);
		assert!(report.is_complete());
		assert_eq!(report.trimmed, vec!["searchHistory", "recentlyOpened"]);
		assert_eq!(report.written.len(), FIELDS.len());

		state.set_path("user.theme", "light");
		let again = state.persist(&store, &ns);
		assert!(again.is_complete());
		assert!(again.trimmed.is_empty());
		assert_eq!(get_json::<Value>(&store, &ns.key("theme")), Some(Value::from("light")));
	}

	#[test]
	fn test_persist_on_disabled_store_fails_softly() {
		let store = MemoryOrigin::disabled().context();
		let report = StateManager::new().persist(&store, &Namespace::default());
		assert!(report.written.is_empty());
		assert_eq!(report.failed.len(), FIELDS.len());
	}
}
