//! Namespace-wide maintenance over a [`KvStore`].
//!
//! Everything here is scoped to one [`Namespace`]: keys outside it (legacy
//! v1 data, other applications) are never listed, counted, cleared or
//! written.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::migrate::SCHEMA_VERSION;
use crate::{KvStore, Namespace, get_json, set_json};

/// Key names trimmed by [`recover_quota`], oldest entries first.
pub const HISTORY_KEYS: &[&str] = &["searchHistory", "recentlyOpened"];

/// Entries a history keeps after [`recover_quota`] trims it.
pub const HISTORY_KEEP: usize = 10;

/// Full durable keys inside `ns`, sorted.
pub fn namespaced_keys(store: &(impl KvStore + ?Sized), ns: &Namespace) -> Vec<String> {
	let mut keys: Vec<String> = store.keys().into_iter().filter(|key| ns.strip(key).is_some()).collect();
	keys.sort_unstable();
	keys
}

/// Removes every key inside `ns`. Returns how many were removed.
pub fn clear(store: &(impl KvStore + ?Sized), ns: &Namespace) -> usize {
	let mut removed = 0;
	for key in namespaced_keys(store, ns) {
		match store.remove(&key) {
			Ok(()) => removed += 1,
			Err(error) => warn!(key, %error, "storage.clear.failed"),
		}
	}
	debug!(ns = %ns, removed, "storage.clear");
	removed
}

/// Space taken by one namespace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
	/// Bytes of keys plus values.
	pub used: usize,
	/// Number of keys.
	pub items: usize,
}

/// Measures the keys inside `ns`.
pub fn stats(store: &(impl KvStore + ?Sized), ns: &Namespace) -> StorageStats {
	namespaced_keys(store, ns)
		.into_iter()
		.filter_map(|key| store.get(&key).map(|value| key.len() + value.len()))
		.fold(StorageStats::default(), |acc, size| StorageStats {
			used: acc.used + size,
			items: acc.items + 1,
		})
}

/// Portable snapshot of one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
	/// Schema version of the exporting store.
	pub version: u32,
	/// When the snapshot was taken.
	pub exported_at: DateTime<Utc>,
	/// Decoded values by full durable key.
	pub data: BTreeMap<String, serde_json::Value>,
}

/// Snapshots every decodable value inside `ns`. Undecodable values are left out.
pub fn export(store: &(impl KvStore + ?Sized), ns: &Namespace) -> Export {
	let data: BTreeMap<String, serde_json::Value> = namespaced_keys(store, ns)
		.into_iter()
		.filter_map(|key| {
			let value = get_json(store, &key)?;
			Some((key, value))
		})
		.collect();
	debug!(ns = %ns, keys = data.len(), "storage.export");
	Export {
		version: SCHEMA_VERSION,
		exported_at: Utc::now(),
		data,
	}
}

/// Outcome of [`import`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
	/// Full keys written.
	pub written: Vec<String>,
	/// Full keys whose write failed.
	pub failed: Vec<String>,
	/// Full keys outside the namespace, not written.
	pub skipped: Vec<String>,
}

/// Writes every entry of `snapshot` that lives inside `ns`.
///
/// Every write is attempted; failures are reported, not returned.
pub fn import(store: &(impl KvStore + ?Sized), ns: &Namespace, snapshot: &Export) -> ImportReport {
	let mut report = ImportReport::default();
	for (key, value) in &snapshot.data {
		if ns.strip(key).is_none() {
			report.skipped.push(key.clone());
			continue;
		}
		match set_json(store, key, value) {
			Ok(()) => report.written.push(key.clone()),
			Err(error) => {
				warn!(key, %error, "storage.import.write_failed");
				report.failed.push(key.clone());
			}
		}
	}
	debug!(
		ns = %ns,
		written = report.written.len(),
		failed = report.failed.len(),
		skipped = report.skipped.len(),
		"storage.import"
	);
	report
}

/// Frees space after a [`QuotaExceeded`](crate::StoreError::QuotaExceeded) by cutting each history
/// key down to its newest [`HISTORY_KEEP`] entries.
///
/// Returns the key names that were trimmed.
pub fn recover_quota(store: &(impl KvStore + ?Sized), ns: &Namespace) -> Vec<&'static str> {
	let mut trimmed = Vec::new();
	for &name in HISTORY_KEYS {
		let key = ns.key(name);
		let Some(serde_json::Value::Array(entries)) = get_json::<serde_json::Value>(store, &key) else {
			continue;
		};
		if entries.len() <= HISTORY_KEEP {
			continue;
		}
		let newest = &entries[entries.len() - HISTORY_KEEP..];
		match set_json(store, &key, newest) {
			Ok(()) => trimmed.push(name),
			Err(error) => warn!(key, %error, "storage.quota.trim_failed"),
		}
	}
	debug!(ns = %ns, ?trimmed, "storage.quota.recovered");
	trimmed
}

#[cfg(test)]
mod tests;
