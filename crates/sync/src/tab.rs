//! Tab identity and wall-clock helpers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

/// Stable identifier of one execution context, `tab_<millis>_<suffix>`.
///
/// Ordering is lexicographic on the rendered string and breaks exact
/// claim-time ties during leader election.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
	/// Generates a fresh id from the current time and a random base36 suffix.
	pub fn generate() -> Self {
		Self(format!("tab_{}_{}", now_ms(), random_suffix()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for TabId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl fmt::Display for TabId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

fn random_suffix() -> String {
	let mut bits = Uuid::new_v4().as_u128();
	let mut suffix = String::with_capacity(SUFFIX_LEN);
	for _ in 0..SUFFIX_LEN {
		suffix.push(BASE36[(bits % 36) as usize] as char);
		bits /= 36;
	}
	suffix
}

/// Monotonic id source for pending initial-sync requests.
#[derive(Debug, Default)]
pub(crate) struct RequestIdGen(u64);

impl RequestIdGen {
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub(crate) fn next(&mut self) -> u64 {
		let id = self.0;
		self.0 += 1;
		id
	}
}
