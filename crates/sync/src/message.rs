//! Wire protocol between tabs.
//!
//! Every message is a JSON object with a `type` tag, the sender's tab id and
//! a send timestamp, plus kind-specific fields:
//!
//! ```json
//! {"type":"LEADER_CLAIM","senderId":"tab_1700000000000_k3j2h1g0f","timestamp":1700000000000,"claimTime":1700000000000}
//! ```

use std::collections::BTreeMap;

use lft_state::Value;
use serde::{Deserialize, Serialize};

use crate::tab::TabId;

/// Durable values of the registered sync keys, as carried by a sync response.
pub type SyncData = BTreeMap<String, Value>;

/// One message exchanged between tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
	pub sender_id: TabId,
	/// Unix milliseconds at send time.
	pub timestamp: i64,
	#[serde(flatten)]
	pub body: MessageBody,
}

/// Kind-specific payload of a [`SyncMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum MessageBody {
	/// A tab started.
	TabOpen,
	/// A tab is shutting down.
	TabClose {
		#[serde(default)]
		is_leader: bool,
	},
	/// A registered key changed in the sender.
	DataChanged { key: String, value: Value, version: i64 },
	/// The sender wants the leader's durable values.
	SyncRequest,
	/// The leader's durable values, addressed to one tab.
	SyncResponse { target_id: TabId, data: SyncData },
	/// The sender is claiming leadership.
	LeaderClaim { claim_time: i64 },
}

impl MessageBody {
	/// Wire tag of this kind.
	pub fn kind(&self) -> &'static str {
		match self {
			MessageBody::TabOpen => "TAB_OPEN",
			MessageBody::TabClose { .. } => "TAB_CLOSE",
			MessageBody::DataChanged { .. } => "DATA_CHANGED",
			MessageBody::SyncRequest => "SYNC_REQUEST",
			MessageBody::SyncResponse { .. } => "SYNC_RESPONSE",
			MessageBody::LeaderClaim { .. } => "LEADER_CLAIM",
		}
	}
}

impl SyncMessage {
	pub fn new(sender_id: TabId, timestamp: i64, body: MessageBody) -> Self {
		Self {
			sender_id,
			timestamp,
			body,
		}
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	pub fn from_json(raw: &str) -> serde_json::Result<Self> {
		serde_json::from_str(raw)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	fn tab(id: &str) -> TabId {
		TabId::from(id)
	}

	#[test]
	fn test_wire_shape_matches_browser_peers() {
		let message = SyncMessage::new(
			tab("tab_1_a"),
			10,
			MessageBody::SyncResponse {
				target_id: tab("tab_2_b"),
				data: SyncData::from([("theme".to_string(), Value::from("dark"))]),
			},
		);
		assert_eq!(
			serde_json::to_value(&message).unwrap(),
			json!({
				"type": "SYNC_RESPONSE",
				"senderId": "tab_1_a",
				"timestamp": 10,
				"targetId": "tab_2_b",
				"data": {"theme": "dark"},
			})
		);

		let claim = SyncMessage::new(tab("tab_1_a"), 10, MessageBody::LeaderClaim { claim_time: 9 });
		assert_eq!(
			serde_json::to_value(&claim).unwrap(),
			json!({"type": "LEADER_CLAIM", "senderId": "tab_1_a", "timestamp": 10, "claimTime": 9})
		);
	}

	#[test]
	fn test_decodes_close_without_leader_flag() {
		let message =
			SyncMessage::from_json(r#"{"type":"TAB_CLOSE","tabId":"tab_1_a","senderId":"tab_1_a","timestamp":3}"#)
				.unwrap();
		assert_eq!(message.body, MessageBody::TabClose { is_leader: false });
		assert_eq!(message.sender_id, tab("tab_1_a"));
	}

	#[test]
	fn test_decodes_nested_values() {
		let message = SyncMessage::from_json(
			r#"{"type":"DATA_CHANGED","senderId":"t","timestamp":1,"key":"votes","value":{"a":[1,2]},"version":1}"#,
		)
		.unwrap();
		let MessageBody::DataChanged { key, value, version } = message.body else {
			panic!("expected DATA_CHANGED");
		};
		assert_eq!((key.as_str(), version), ("votes", 1));
		assert_eq!(
			value.get("a"),
			Some(&Value::List(vec![Value::from(1), Value::from(2)]))
		);
	}

	#[test]
	fn test_rejects_unknown_kinds() {
		assert!(SyncMessage::from_json(r#"{"type":"PING","senderId":"t","timestamp":1}"#).is_err());
		assert!(SyncMessage::from_json("not json").is_err());
	}
}
