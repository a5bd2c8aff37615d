//! Cross-tab sync manager.
//!
//! [`SyncManager`] owns one tab's identity and its side of the sync protocol:
//! - Registered sync keys gating what is sent and accepted
//! - Leader election through the durable claim record
//! - Initial sync requests answered by the leader from the durable store
//! - Direct writes of registered keys observed through storage events
//!
//! # Dispatch
//!
//! Everything inbound (peer messages, foreign storage writes, election
//! settle timers) is funneled into one dispatcher task and handled to
//! completion in arrival order. Outbound calls on the handle send directly
//! through the transport.
//!
//! # Error Handling
//!
//! - Transport failures: logged at debug, dropped
//! - Store failures during election or response assembly: logged, key skipped
//! - Malformed payloads: dropped

mod election;
mod service;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexSet;
use lft_state::{StateManager, Value, slices};
use lft_storage::{ObservableStore, get_json};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use self::election::{ClaimRecord, LEADER_CLAIM_KEY};
use self::service::{Inbound, SyncService};
use crate::config::SyncConfig;
use crate::error::ConfigError;
use crate::message::{MessageBody, SyncData, SyncMessage};
use crate::tab::{RequestIdGen, TabId, now_ms};
use crate::transport::{BroadcastHub, StorageTransport, Transport, TransportKind};

/// Where a received value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSource {
	/// A `DATA_CHANGED` message from the given tab.
	Tab(TabId),
	/// A foreign write of the namespaced key itself.
	Storage,
}

/// Observable sync activity of one tab.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
	/// A registered key was updated by a peer and applied under `sync.<key>`.
	Received { key: String, value: Value, source: SyncSource },
	/// This tab gained or lost leadership.
	LeaderChanged { is_leader: bool },
}

#[derive(Default)]
struct PendingSyncs {
	ids: RequestIdGen,
	waiting: HashMap<u64, oneshot::Sender<SyncData>>,
}

/// State shared between the handle and the dispatcher task.
struct Shared {
	tab_id: TabId,
	config: SyncConfig,
	state: StateManager,
	store: Arc<dyn ObservableStore>,
	transport: Arc<dyn Transport>,
	sync_keys: RwLock<IndexSet<String>>,
	leader: AtomicBool,
	pending: Mutex<PendingSyncs>,
	events: broadcast::Sender<SyncEvent>,
	inbox: mpsc::UnboundedSender<Inbound>,
	cancel: CancellationToken,
}

impl Shared {
	fn broadcast(&self, body: MessageBody) {
		let kind = body.kind();
		let message = SyncMessage::new(self.tab_id.clone(), now_ms(), body);
		match self.transport.send(&message) {
			Ok(()) => trace!(tab = %self.tab_id, kind, "sync.send"),
			Err(error) => debug!(tab = %self.tab_id, kind, %error, "sync.send_failed"),
		}
	}

	fn is_registered(&self, key: &str) -> bool {
		self.sync_keys.read().contains(key)
	}

	fn is_leader(&self) -> bool {
		self.leader.load(Ordering::Acquire)
	}

	fn set_leader(&self, is_leader: bool) {
		if self.leader.swap(is_leader, Ordering::AcqRel) != is_leader {
			debug!(tab = %self.tab_id, is_leader, "sync.leader.changed");
			let _ = self.events.send(SyncEvent::LeaderChanged { is_leader });
		}
	}

	/// Election steps 1 and 2: announce a claim and arm the settle timer.
	fn begin_election(&self) {
		let claim_time = election::next_claim_time();
		self.broadcast(MessageBody::LeaderClaim { claim_time });
		debug!(tab = %self.tab_id, claim_time, "sync.leader.claim");

		let inbox = self.inbox.clone();
		let cancel = self.cancel.clone();
		let window = self.config.settle_window();
		tokio::spawn(async move {
			tokio::select! {
				_ = cancel.cancelled() => {}
				_ = tokio::time::sleep(window) => {
					let _ = inbox.send(Inbound::Settle { claim_time });
				}
			}
		});
	}

	/// Durable values of every registered key. Undecodable keys are skipped.
	fn collect_sync_data(&self) -> SyncData {
		let keys: Vec<String> = self.sync_keys.read().iter().cloned().collect();
		keys.into_iter()
			.filter_map(|key| {
				let value = get_json::<Value>(&*self.store, &self.config.namespace.key(&key))?;
				Some((key, value))
			})
			.collect()
	}

	fn apply_remote(&self, key: &str, value: Value, source: SyncSource) {
		self.state.set_path(&format!("{}.{key}", slices::SYNC), value.clone());
		debug!(tab = %self.tab_id, key, ?source, "sync.received");
		let _ = self.events.send(SyncEvent::Received {
			key: key.to_string(),
			value,
			source,
		});
	}
}

/// One tab's participant in cross-tab sync.
///
/// Must be created inside a Tokio runtime. Dropping the manager without
/// calling [`SyncManager::destroy`] destroys it.
pub struct SyncManager {
	shared: Arc<Shared>,
	destroyed: AtomicBool,
}

impl std::fmt::Debug for SyncManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SyncManager")
			.field("tab_id", &self.shared.tab_id)
			.field("transport", &self.shared.transport.kind())
			.field("is_leader", &self.shared.is_leader())
			.field("destroyed", &self.destroyed.load(Ordering::Relaxed))
			.finish_non_exhaustive()
	}
}

impl SyncManager {
	/// Joins the sync protocol.
	///
	/// Uses `transport` when given, otherwise pulses messages through `store`.
	/// Registers the configured default keys, announces `TAB_OPEN` and starts
	/// a leader election. Fails without side effects if `config` does not
	/// pass [`SyncConfig::validate`].
	pub fn new(
		config: SyncConfig,
		state: StateManager,
		store: Arc<dyn ObservableStore>,
		transport: Option<Arc<dyn Transport>>,
	) -> Result<Self, ConfigError> {
		config.validate()?;
		let tab_id = TabId::generate();
		let transport: Arc<dyn Transport> = match transport {
			Some(transport) => transport,
			None => Arc::new(StorageTransport::new(Arc::clone(&store), &config.namespace)),
		};
		let watch = store.watch();
		let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
		let (events, _) = broadcast::channel(config.event_capacity.max(1));
		let sync_keys: IndexSet<String> = config.default_sync_keys.iter().cloned().collect();

		let shared = Arc::new(Shared {
			tab_id,
			config,
			state,
			store,
			transport,
			sync_keys: RwLock::new(sync_keys),
			leader: AtomicBool::new(false),
			pending: Mutex::new(PendingSyncs::default()),
			events,
			inbox: inbox_tx.clone(),
			cancel: CancellationToken::new(),
		});

		shared.transport.on_message(Box::new(move |message| {
			let _ = inbox_tx.send(Inbound::Message(message));
		}));
		tokio::spawn(SyncService::new(Arc::clone(&shared), inbox_rx, watch).run());

		debug!(
			tab = %shared.tab_id,
			transport = ?shared.transport.kind(),
			"sync.open"
		);
		shared.broadcast(MessageBody::TabOpen);
		shared.begin_election();

		Ok(Self {
			shared,
			destroyed: AtomicBool::new(false),
		})
	}

	/// Joins the sync protocol over the configured channel of `hub`.
	pub fn with_hub(
		config: SyncConfig,
		state: StateManager,
		store: Arc<dyn ObservableStore>,
		hub: &BroadcastHub,
	) -> Result<Self, ConfigError> {
		config.validate()?;
		let transport: Arc<dyn Transport> = Arc::new(hub.open(&config.channel));
		Self::new(config, state, store, Some(transport))
	}

	pub fn tab_id(&self) -> &TabId {
		&self.shared.tab_id
	}

	pub fn is_leader(&self) -> bool {
		self.shared.is_leader()
	}

	pub fn config(&self) -> &SyncConfig {
		&self.shared.config
	}

	pub fn transport_kind(&self) -> TransportKind {
		self.shared.transport.kind()
	}

	/// Makes `key` eligible for propagation in both directions.
	pub fn register_sync_key(&self, key: impl Into<String>) {
		self.shared.sync_keys.write().insert(key.into());
	}

	pub fn unregister_sync_key(&self, key: &str) {
		self.shared.sync_keys.write().shift_remove(key);
	}

	/// Registered keys in registration order.
	pub fn sync_keys(&self) -> Vec<String> {
		self.shared.sync_keys.read().iter().cloned().collect()
	}

	/// Subscribes to received values and leadership changes.
	pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
		self.shared.events.subscribe()
	}

	/// Broadcasts a new value for `key` to peers.
	///
	/// Returns false without sending if `key` is not registered. The local
	/// store is not written.
	pub fn sync(&self, key: &str, value: impl Into<Value>) -> bool {
		if !self.shared.is_registered(key) {
			trace!(tab = %self.shared.tab_id, key, "sync.unregistered_key");
			return false;
		}
		self.shared.broadcast(MessageBody::DataChanged {
			key: key.to_string(),
			value: value.into(),
			version: now_ms(),
		});
		true
	}

	/// Asks the leader for its durable values.
	///
	/// Resolves to `None` when no leader answers within the configured
	/// timeout, which is the normal outcome for a lone tab.
	pub async fn request_initial_sync(&self) -> Option<SyncData> {
		if self.destroyed.load(Ordering::Acquire) {
			return None;
		}
		let (tx, mut rx) = oneshot::channel();
		let id = {
			let mut pending = self.shared.pending.lock();
			let id = pending.ids.next();
			pending.waiting.insert(id, tx);
			id
		};
		self.shared.broadcast(MessageBody::SyncRequest);

		match tokio::time::timeout(self.shared.config.initial_sync_timeout(), &mut rx).await {
			Ok(Ok(data)) => Some(data),
			Ok(Err(_)) => None,
			Err(_) => {
				let expired = self.shared.pending.lock().waiting.remove(&id).is_some();
				if expired {
					debug!(tab = %self.shared.tab_id, request = id, "sync.initial.timeout");
					None
				} else {
					// Answered between the deadline and the removal.
					rx.try_recv().ok()
				}
			}
		}
	}

	/// Re-broadcasts the durable value of every registered key. Returns the
	/// number of keys sent.
	pub fn force_sync(&self) -> usize {
		let data = self.shared.collect_sync_data();
		let sent = data.len();
		for (key, value) in data {
			self.shared.broadcast(MessageBody::DataChanged {
				key,
				value,
				version: now_ms(),
			});
		}
		debug!(tab = %self.shared.tab_id, sent, "sync.force");
		sent
	}

	/// Announces `TAB_CLOSE`, closes the transport and stops background work.
	///
	/// A leader also clears its claim record. Idempotent.
	pub fn destroy(&self) {
		if self.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		let shared = &self.shared;
		let was_leader = shared.is_leader();
		if was_leader {
			ClaimRecord::clear_if_held_by(&*shared.store, &shared.config.namespace, &shared.tab_id);
		}
		shared.broadcast(MessageBody::TabClose { is_leader: was_leader });
		shared.transport.close();
		shared.cancel.cancel();
		shared.pending.lock().waiting.clear();
		debug!(tab = %shared.tab_id, was_leader, "sync.destroy");
	}
}

impl Drop for SyncManager {
	fn drop(&mut self) {
		self.destroy();
	}
}

#[cfg(test)]
mod tests;
