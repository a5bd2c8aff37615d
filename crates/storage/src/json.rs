//! JSON encoding on top of the raw string store.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::{KvStore, Result, StoreError};

const PROBE_KEY: &str = "__storage_test__";

/// Reads and decodes `key`. Missing and undecodable values both yield `None`.
pub fn get_json<T: DeserializeOwned>(store: &(impl KvStore + ?Sized), key: &str) -> Option<T> {
	let raw = store.get(key)?;
	match serde_json::from_str(&raw) {
		Ok(value) => Some(value),
		Err(error) => {
			warn!(key, %error, "storage.json.decode_failed");
			None
		}
	}
}

/// Encodes `value` and writes it under `key`.
pub fn set_json<T: Serialize + ?Sized>(store: &(impl KvStore + ?Sized), key: &str, value: &T) -> Result<()> {
	let raw = serde_json::to_string(value).map_err(|error| StoreError::Encode {
		key: key.to_string(),
		error,
	})?;
	store.set(key, &raw)
}

/// Returns true if the store accepts a write and removal of a probe key.
pub fn probe_available(store: &(impl KvStore + ?Sized)) -> bool {
	match store.set(PROBE_KEY, PROBE_KEY).and_then(|()| store.remove(PROBE_KEY)) {
		Ok(()) => true,
		Err(error) => {
			warn!(%error, "storage.unavailable");
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MemoryOrigin;

	#[test]
	fn test_json_roundtrip_and_bad_payload() {
		let store = MemoryOrigin::new().context();
		set_json(&store, "votes", &serde_json::json!({ "a": 1 })).unwrap();
		let votes: serde_json::Value = get_json(&store, "votes").unwrap();
		assert_eq!(votes["a"], 1);

		store.set("broken", "{not json").unwrap();
		assert_eq!(get_json::<serde_json::Value>(&store, "broken"), None);
		assert_eq!(get_json::<serde_json::Value>(&store, "missing"), None);
	}

	#[test]
	fn test_probe() {
		let origin = MemoryOrigin::new();
		assert!(probe_available(&origin.context()));
		assert!(origin.is_empty());
		assert!(!probe_available(&MemoryOrigin::disabled().context()));
	}
}
