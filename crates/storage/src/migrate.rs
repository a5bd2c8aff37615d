//! One-shot migration of un-namespaced v1 keys into the namespace.

use tracing::{debug, warn};

use crate::{KvStore, Namespace, get_json, set_json};

/// Current storage schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Key name (inside the namespace) holding the applied schema version.
pub const VERSION_KEY: &str = "migration_version";

/// v1 key → namespaced key name.
const LEGACY_KEYS: &[(&str, &str)] = &[
	("pinnedTools", "pinnedTools"),
	("votes", "votes"),
	("toolUsage", "usage"),
	("recentlyOpened", "recentlyOpened"),
	("collections", "collections"),
	("searchHistory", "searchHistory"),
	("theme", "theme"),
	("tourCompleted", "tourCompleted"),
	("analyticsEnabled", "analyticsEnabled"),
];

/// Outcome of [`migrate_legacy`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
	/// Namespaced key names that received a v1 value.
	pub migrated: Vec<String>,
	/// Namespaced key names whose write failed.
	pub failed: Vec<String>,
	/// True when the schema was already current and nothing ran.
	pub up_to_date: bool,
}

/// Copies v1 values into the namespace where no namespaced value exists yet.
///
/// Runs once per origin: the applied version is recorded under
/// [`VERSION_KEY`]. v1 values that are not valid JSON are stored as JSON
/// strings. v1 keys are left in place.
pub fn migrate_legacy(store: &(impl KvStore + ?Sized), ns: &Namespace) -> MigrationReport {
	let version_key = ns.key(VERSION_KEY);
	let current: u32 = get_json(store, &version_key).unwrap_or(0);
	if current >= SCHEMA_VERSION {
		return MigrationReport {
			up_to_date: true,
			..MigrationReport::default()
		};
	}

	let mut report = MigrationReport::default();
	for &(legacy, name) in LEGACY_KEYS {
		let Some(raw) = store.get(legacy) else {
			continue;
		};
		let target = ns.key(name);
		if store.get(&target).is_some() {
			continue;
		}

		let written = if serde_json::from_str::<serde_json::Value>(&raw).is_ok() {
			store.set(&target, &raw)
		} else {
			set_json(store, &target, &raw)
		};
		match written {
			Ok(()) => {
				debug!(from = legacy, to = %target, "storage.migrate.key");
				report.migrated.push(name.to_string());
			}
			Err(error) => {
				warn!(from = legacy, to = %target, %error, "storage.migrate.failed");
				report.failed.push(name.to_string());
			}
		}
	}

	if let Err(error) = set_json(store, &version_key, &SCHEMA_VERSION) {
		warn!(%error, "storage.migrate.version_write_failed");
	}
	report
}
