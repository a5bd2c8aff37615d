//! Durable leader claim record.

use std::sync::atomic::{AtomicI64, Ordering};

use lft_storage::{KvStore, Namespace, get_json, set_json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tab::{TabId, now_ms};

/// Key name (inside the namespace) of the leader claim record.
pub const LEADER_CLAIM_KEY: &str = "leader_claim";

static LAST_CLAIM: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall-clock claim time in Unix milliseconds, strictly increasing within
/// one process so that tabs sharing a process never claim at the same instant.
pub(crate) fn next_claim_time() -> i64 {
	let now = now_ms();
	let last = LAST_CLAIM
		.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last.saturating_add(1))))
		.unwrap_or_else(|last| last);
	now.max(last.saturating_add(1))
}

/// The `(claimTime, tabId)` pair of the tab currently believed to lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
	pub claim_time: i64,
	pub tab_id: TabId,
}

impl ClaimRecord {
	/// Reads the record. Missing and undecodable records both yield `None`.
	pub fn load(store: &(impl KvStore + ?Sized), ns: &Namespace) -> Option<Self> {
		get_json(store, &ns.key(LEADER_CLAIM_KEY))
	}

	pub(crate) fn store(&self, store: &(impl KvStore + ?Sized), ns: &Namespace) {
		if let Err(error) = set_json(store, &ns.key(LEADER_CLAIM_KEY), self) {
			warn!(tab = %self.tab_id, %error, "sync.leader.record_write_failed");
		}
	}

	/// Removes the record if it names `tab`. Returns true if it did.
	pub(crate) fn clear_if_held_by(store: &(impl KvStore + ?Sized), ns: &Namespace, tab: &TabId) -> bool {
		if Self::load(store, ns).is_none_or(|record| record.tab_id != *tab) {
			return false;
		}
		match store.remove(&ns.key(LEADER_CLAIM_KEY)) {
			Ok(()) => true,
			Err(error) => {
				warn!(%tab, %error, "sync.leader.record_clear_failed");
				false
			}
		}
	}

	/// True if a claim at `claim_time` by `tab` takes precedence over this
	/// record: an earlier claim wins, and exact ties go to the smaller tab id.
	pub fn yields_to(&self, claim_time: i64, tab: &TabId) -> bool {
		(claim_time, tab) <= (self.claim_time, &self.tab_id)
	}

	/// Like [`ClaimRecord::yields_to`], but an identical claim does not count.
	pub fn strictly_yields_to(&self, claim_time: i64, tab: &TabId) -> bool {
		(claim_time, tab) < (self.claim_time, &self.tab_id)
	}
}

#[cfg(test)]
mod tests {
	use lft_storage::MemoryOrigin;

	use super::*;

	fn record(claim_time: i64, tab: &str) -> ClaimRecord {
		ClaimRecord {
			claim_time,
			tab_id: TabId::from(tab),
		}
	}

	#[test]
	fn test_earlier_claim_wins_and_ties_go_to_smaller_id() {
		let stored = record(100, "tab_100_m");
		assert!(stored.yields_to(99, &TabId::from("tab_099_z")));
		assert!(!stored.yields_to(101, &TabId::from("tab_101_a")));
		assert!(stored.yields_to(100, &TabId::from("tab_100_a")));
		assert!(!stored.yields_to(100, &TabId::from("tab_100_z")));
		assert!(stored.yields_to(100, &TabId::from("tab_100_m")));
		assert!(!stored.strictly_yields_to(100, &TabId::from("tab_100_m")));
	}

	#[test]
	fn test_claim_times_strictly_increase() {
		let first = next_claim_time();
		let second = next_claim_time();
		assert!(second > first);
	}

	#[test]
	fn test_record_roundtrip_and_owner_only_clear() {
		let store = MemoryOrigin::new().context();
		let ns = Namespace::default();
		assert_eq!(ClaimRecord::load(&store, &ns), None);

		let held = record(7, "tab_7_a");
		held.store(&store, &ns);
		assert_eq!(
			store.get(&ns.key(LEADER_CLAIM_KEY)).as_deref(),
			Some(r#"{"claimTime":7,"tabId":"tab_7_a"}"#)
		);

		assert!(!ClaimRecord::clear_if_held_by(&store, &ns, &TabId::from("tab_8_b")));
		assert_eq!(ClaimRecord::load(&store, &ns), Some(held));
		assert!(ClaimRecord::clear_if_held_by(&store, &ns, &TabId::from("tab_7_a")));
		assert_eq!(ClaimRecord::load(&store, &ns), None);
	}
}
