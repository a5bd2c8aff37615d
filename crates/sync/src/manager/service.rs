use std::sync::Arc;

use lft_state::Value;
use lft_storage::{StorageEvent, StorageWatch};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::election::{ClaimRecord, LEADER_CLAIM_KEY};
use super::{Shared, SyncSource};
use crate::message::{MessageBody, SyncData, SyncMessage};
use crate::tab::TabId;
use crate::transport::SYNC_MESSAGE_KEY;

/// Work queued for the dispatcher.
#[derive(Debug)]
pub(super) enum Inbound {
	/// A message from a peer.
	Message(SyncMessage),
	/// The settle window of the claim made at `claim_time` elapsed.
	Settle { claim_time: i64 },
}

/// Dispatcher task handling one inbound item at a time.
pub(super) struct SyncService {
	shared: Arc<Shared>,
	inbox: mpsc::UnboundedReceiver<Inbound>,
	watch: StorageWatch,
}

impl SyncService {
	pub(super) fn new(shared: Arc<Shared>, inbox: mpsc::UnboundedReceiver<Inbound>, watch: StorageWatch) -> Self {
		Self { shared, inbox, watch }
	}

	pub(super) async fn run(mut self) {
		let cancel = self.shared.cancel.clone();
		let mut watching = true;
		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				inbound = self.inbox.recv() => {
					let Some(inbound) = inbound else {
						break;
					};
					match inbound {
						Inbound::Message(message) => self.handle_message(message),
						Inbound::Settle { claim_time } => self.handle_settle(claim_time),
					}
				}
				event = self.watch.recv(), if watching => match event {
					Some(event) => self.handle_storage(event),
					None => watching = false,
				},
			}
		}
		trace!(tab = %self.shared.tab_id, "sync.service.stopped");
	}

	fn handle_message(&self, message: SyncMessage) {
		let shared = &self.shared;
		if message.sender_id == shared.tab_id {
			return;
		}
		trace!(tab = %shared.tab_id, from = %message.sender_id, kind = message.body.kind(), "sync.message");

		match message.body {
			MessageBody::TabOpen | MessageBody::SyncRequest => {
				if shared.is_leader() {
					self.respond(message.sender_id);
				}
			}
			MessageBody::TabClose { is_leader } => self.handle_tab_close(&message.sender_id, is_leader),
			MessageBody::DataChanged { key, value, version } => {
				if !shared.is_registered(&key) {
					trace!(tab = %shared.tab_id, key, "sync.message.unregistered_key");
					return;
				}
				trace!(key, version, "sync.data_changed");
				shared.apply_remote(&key, value, SyncSource::Tab(message.sender_id));
			}
			MessageBody::SyncResponse { target_id, data } => {
				if target_id == shared.tab_id {
					self.resolve_pending(data);
				}
			}
			MessageBody::LeaderClaim { claim_time } => self.handle_leader_claim(&message.sender_id, claim_time),
		}
	}

	fn respond(&self, target_id: TabId) {
		let data = self.shared.collect_sync_data();
		debug!(tab = %self.shared.tab_id, target = %target_id, keys = data.len(), "sync.respond");
		self.shared.broadcast(MessageBody::SyncResponse { target_id, data });
	}

	fn resolve_pending(&self, data: SyncData) {
		let waiting: Vec<_> = self.shared.pending.lock().waiting.drain().map(|(_, tx)| tx).collect();
		debug!(tab = %self.shared.tab_id, resolved = waiting.len(), "sync.initial.resolved");
		for tx in waiting {
			let _ = tx.send(data.clone());
		}
	}

	fn handle_tab_close(&self, sender: &TabId, was_leader: bool) {
		if !was_leader {
			return;
		}
		let shared = &self.shared;
		if ClaimRecord::clear_if_held_by(&*shared.store, &shared.config.namespace, sender) {
			debug!(tab = %shared.tab_id, closed = %sender, "sync.leader.record_cleared");
		}
		shared.begin_election();
	}

	/// Election step 3: take the record if no earlier claim holds it.
	fn handle_settle(&self, claim_time: i64) {
		let shared = &self.shared;
		let ns = &shared.config.namespace;
		let won = ClaimRecord::load(&*shared.store, ns).is_none_or(|stored| stored.yields_to(claim_time, &shared.tab_id));
		if !won {
			trace!(tab = %shared.tab_id, claim_time, "sync.leader.claim_lost");
			return;
		}
		let record = ClaimRecord {
			claim_time,
			tab_id: shared.tab_id.clone(),
		};
		record.store(&*shared.store, ns);
		debug!(tab = %shared.tab_id, claim_time, "sync.leader.claimed");
		shared.set_leader(true);
	}

	/// Election step 4: step down for an earlier peer claim.
	fn handle_leader_claim(&self, sender: &TabId, claim_time: i64) {
		let shared = &self.shared;
		let peer_first = ClaimRecord::load(&*shared.store, &shared.config.namespace)
			.is_none_or(|stored| stored.strictly_yields_to(claim_time, sender));
		if peer_first {
			shared.set_leader(false);
		}
	}

	/// Treats a foreign write of `<ns>/<registered key>` as a value change.
	fn handle_storage(&self, event: StorageEvent) {
		let shared = &self.shared;
		let Some(key) = shared.config.namespace.strip(&event.key) else {
			return;
		};
		if key == SYNC_MESSAGE_KEY || key == LEADER_CLAIM_KEY || !shared.is_registered(key) {
			return;
		}
		let value = match event.new_value.as_deref().map(serde_json::from_str::<Value>) {
			None => Value::Null,
			Some(Ok(value)) => value,
			Some(Err(error)) => {
				trace!(key, %error, "sync.storage.value_dropped");
				return;
			}
		};
		shared.apply_remote(key, value, SyncSource::Storage);
	}
}
