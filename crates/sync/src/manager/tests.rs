use std::time::Duration;

use lft_storage::{KvStore, MemoryOrigin, MemoryStore, Namespace};
use pretty_assertions::assert_eq;

use super::*;
use crate::config::DEFAULT_SYNC_KEYS;
use crate::transport::BroadcastTransport;

const SETTLE: Duration = Duration::from_millis(150);

/// Raw endpoint on the sync channel that records everything tabs send.
struct Spy {
	endpoint: BroadcastTransport,
	rx: mpsc::UnboundedReceiver<SyncMessage>,
}

impl Spy {
	fn open(hub: &BroadcastHub) -> Self {
		let endpoint = hub.open(crate::config::DEFAULT_CHANNEL);
		let (tx, rx) = mpsc::unbounded_channel();
		endpoint.on_message(Box::new(move |message| {
			let _ = tx.send(message);
		}));
		Self { endpoint, rx }
	}

	fn send(&self, sender: &str, body: MessageBody) {
		self.endpoint
			.send(&SyncMessage::new(TabId::from(sender), now_ms(), body))
			.unwrap();
	}

	fn drain(&mut self) -> Vec<MessageBody> {
		let mut seen = Vec::new();
		while let Ok(message) = self.rx.try_recv() {
			seen.push(message.body);
		}
		seen
	}
}

/// Lets spawned pumps and the dispatcher drain without reaching a settle timer.
async fn let_tasks_run() {
	tokio::time::sleep(Duration::from_millis(1)).await;
}

fn open_tab(hub: &BroadcastHub, origin: &MemoryOrigin) -> (SyncManager, StateManager, MemoryStore) {
	let state = StateManager::new();
	let store = origin.context();
	let manager = SyncManager::with_hub(SyncConfig::default(), state.clone(), Arc::new(store.clone()), hub).unwrap();
	(manager, state, store)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lone_tab_announces_and_becomes_leader() {
	let _ = tracing_subscriber::fmt::try_init();
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let mut spy = Spy::open(&hub);
	let (manager, _state, store) = open_tab(&hub, &origin);
	let mut events = manager.subscribe_events();

	assert!(!manager.is_leader());
	tokio::time::sleep(SETTLE).await;

	assert!(manager.is_leader());
	assert_eq!(events.try_recv().unwrap(), SyncEvent::LeaderChanged { is_leader: true });
	let record = ClaimRecord::load(&store, &Namespace::default()).unwrap();
	assert_eq!(&record.tab_id, manager.tab_id());

	let sent = spy.drain();
	assert_eq!(sent[0], MessageBody::TabOpen);
	assert!(matches!(sent[1], MessageBody::LeaderClaim { claim_time } if claim_time == record.claim_time));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn sync_keys_start_from_defaults_and_gate_sends() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, _state, _store) = open_tab(&hub, &origin);
	let mut spy = Spy::open(&hub);

	assert_eq!(manager.sync_keys(), DEFAULT_SYNC_KEYS.to_vec());
	assert!(!manager.sync("fontSize", 14));

	manager.register_sync_key("fontSize");
	manager.unregister_sync_key("votes");
	assert!(manager.sync("fontSize", 14));
	assert!(!manager.sync("votes", Value::record()));
	let_tasks_run().await;

	let sent: Vec<_> = spy
		.drain()
		.into_iter()
		.filter(|body| matches!(body, MessageBody::DataChanged { .. }))
		.collect();
	assert_eq!(sent.len(), 1);
	assert!(matches!(&sent[0], MessageBody::DataChanged { key, value, .. } if key == "fontSize" && *value == Value::from(14)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn incoming_changes_apply_only_for_registered_keys() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, state, _store) = open_tab(&hub, &origin);
	let mut events = manager.subscribe_events();
	let spy = Spy::open(&hub);

	spy.send("tab_peer", MessageBody::DataChanged {
		key: "secret".into(),
		value: Value::from(1),
		version: 1,
	});
	spy.send("tab_peer", MessageBody::DataChanged {
		key: "theme".into(),
		value: Value::from("light"),
		version: 2,
	});
	let_tasks_run().await;

	assert_eq!(state.get_state().get_path("sync.secret"), None);
	assert_eq!(state.get_state().get_path("sync.theme"), Some(&Value::from("light")));
	assert_eq!(
		events.try_recv().unwrap(),
		SyncEvent::Received {
			key: "theme".into(),
			value: Value::from("light"),
			source: SyncSource::Tab(TabId::from("tab_peer")),
		}
	);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn initial_sync_times_out_to_none_and_clears_pending() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, _state, _store) = open_tab(&hub, &origin);

	let started = tokio::time::Instant::now();
	assert_eq!(manager.request_initial_sync().await, None);
	assert!(started.elapsed() >= manager.config().initial_sync_timeout());
	assert!(manager.shared.pending.lock().waiting.is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn response_for_another_tab_is_ignored() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, _state, _store) = open_tab(&hub, &origin);
	let spy = Spy::open(&hub);
	let tab_id = manager.tab_id().clone();

	let request = manager.request_initial_sync();
	let answer = async {
		tokio::time::sleep(Duration::from_millis(10)).await;
		spy.send("tab_leader", MessageBody::SyncResponse {
			target_id: TabId::from("tab_someone_else"),
			data: SyncData::from([("theme".to_string(), Value::from("x"))]),
		});
		tokio::time::sleep(Duration::from_millis(10)).await;
		spy.send("tab_leader", MessageBody::SyncResponse {
			target_id: tab_id,
			data: SyncData::from([("theme".to_string(), Value::from("dark"))]),
		});
	};
	let (data, ()) = tokio::join!(request, answer);

	assert_eq!(data, Some(SyncData::from([("theme".to_string(), Value::from("dark"))])));
	assert!(manager.shared.pending.lock().waiting.is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn destroy_is_idempotent_and_releases_leadership() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, _state, store) = open_tab(&hub, &origin);
	tokio::time::sleep(SETTLE).await;
	assert!(manager.is_leader());
	let mut spy = Spy::open(&hub);

	manager.destroy();
	manager.destroy();
	let_tasks_run().await;

	assert_eq!(spy.drain(), vec![MessageBody::TabClose { is_leader: true }]);
	assert_eq!(ClaimRecord::load(&store, &Namespace::default()), None);
	assert_eq!(manager.request_initial_sync().await, None);
	manager.sync("theme", "dark");
	drop(manager);
	let_tasks_run().await;
	assert!(spy.drain().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_without_destroy_announces_close() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, _state, _store) = open_tab(&hub, &origin);
	let mut spy = Spy::open(&hub);

	drop(manager);
	let_tasks_run().await;
	assert_eq!(spy.drain(), vec![MessageBody::TabClose { is_leader: false }]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn force_sync_rebroadcasts_durable_values() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let (manager, _state, store) = open_tab(&hub, &origin);
	let ns = Namespace::default();
	store.set(&ns.key("theme"), r#""light""#).unwrap();
	store.set(&ns.key("votes"), "{broken").unwrap();
	store.set(&ns.key("unrelated"), "1").unwrap();
	let mut spy = Spy::open(&hub);

	assert_eq!(manager.force_sync(), 1);
	let_tasks_run().await;
	let sent = spy.drain();
	assert_eq!(sent.len(), 1);
	assert!(matches!(&sent[0], MessageBody::DataChanged { key, value, .. } if key == "theme" && *value == Value::from("light")));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn invalid_config_is_rejected_before_joining() {
	let hub = BroadcastHub::new();
	let origin = MemoryOrigin::new();
	let mut spy = Spy::open(&hub);
	let config = SyncConfig {
		namespace: Namespace::new(""),
		..SyncConfig::default()
	};

	let result = SyncManager::with_hub(config.clone(), StateManager::new(), Arc::new(origin.context()), &hub);
	assert!(matches!(result, Err(ConfigError::Invalid { field: "namespace", .. })));
	let result = SyncManager::new(config, StateManager::new(), Arc::new(origin.context()), None);
	assert!(matches!(result, Err(ConfigError::Invalid { field: "namespace", .. })));

	tokio::time::sleep(SETTLE).await;
	assert!(spy.drain().is_empty());
	assert!(origin.is_empty());
	assert_eq!(hub.endpoints(crate::config::DEFAULT_CHANNEL), 1);
}
