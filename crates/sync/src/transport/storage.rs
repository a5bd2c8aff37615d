use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lft_storage::{KvStore, Namespace, ObservableStore, StorageWatch};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{MessageHandler, Transport, TransportKind};
use crate::error::TransportError;
use crate::message::SyncMessage;

/// Key name (inside the namespace) of the sentinel carrying pulsed messages.
pub const SYNC_MESSAGE_KEY: &str = "sync_message";

/// Delivers messages by writing them to a sentinel key and removing it
/// immediately; peers decode the value from the resulting change events.
pub struct StorageTransport {
	store: Arc<dyn ObservableStore>,
	sentinel: String,
	watch: Mutex<Option<StorageWatch>>,
	cancel: CancellationToken,
	closed: AtomicBool,
}

impl std::fmt::Debug for StorageTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StorageTransport")
			.field("sentinel", &self.sentinel)
			.field("closed", &self.closed.load(Ordering::Relaxed))
			.finish_non_exhaustive()
	}
}

impl StorageTransport {
	/// Starts observing `store` for pulses under `ns`.
	pub fn new(store: Arc<dyn ObservableStore>, ns: &Namespace) -> Self {
		let watch = store.watch();
		Self {
			store,
			sentinel: ns.key(SYNC_MESSAGE_KEY),
			watch: Mutex::new(Some(watch)),
			cancel: CancellationToken::new(),
			closed: AtomicBool::new(false),
		}
	}
}

impl Transport for StorageTransport {
	fn kind(&self) -> TransportKind {
		TransportKind::Storage
	}

	fn send(&self, message: &SyncMessage) -> Result<(), TransportError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(TransportError::Closed);
		}
		let raw = message.to_json()?;
		self.store.set(&self.sentinel, &raw)?;
		self.store.remove(&self.sentinel)?;
		trace!(kind = message.body.kind(), "sync.storage.pulse");
		Ok(())
	}

	fn on_message(&self, handler: MessageHandler) {
		let Some(mut watch) = self.watch.lock().take() else {
			debug!("sync.storage.handler_ignored");
			return;
		};
		let cancel = self.cancel.clone();
		let sentinel = self.sentinel.clone();
		tokio::spawn(async move {
			loop {
				let event = tokio::select! {
					_ = cancel.cancelled() => break,
					event = watch.recv() => event,
				};
				let Some(event) = event else {
					break;
				};
				if event.key != sentinel {
					continue;
				}
				// Removals carry no payload.
				let Some(raw) = event.new_value else {
					continue;
				};
				match SyncMessage::from_json(&raw) {
					Ok(message) => handler(message),
					Err(error) => trace!(%error, "sync.storage.message_dropped"),
				}
			}
			trace!("sync.storage.pump_stopped");
		});
	}

	fn close(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.cancel.cancel();
		self.watch.lock().take();
		debug!(sentinel = %self.sentinel, "sync.storage.close");
	}
}

#[cfg(test)]
mod tests {
	use lft_storage::MemoryOrigin;
	use tokio::sync::mpsc;

	use super::*;
	use crate::message::MessageBody;
	use crate::tab::TabId;

	#[tokio::test(flavor = "current_thread")]
	async fn test_pulse_reaches_peer_and_leaves_no_residue() {
		let origin = MemoryOrigin::new();
		let ns = Namespace::default();
		let a = StorageTransport::new(Arc::new(origin.context()), &ns);
		let b = StorageTransport::new(Arc::new(origin.context()), &ns);

		let (tx, mut rx) = mpsc::unbounded_channel();
		b.on_message(Box::new(move |m| {
			let _ = tx.send(m);
		}));

		let sent = SyncMessage::new(TabId::from("tab_a"), 5, MessageBody::LeaderClaim { claim_time: 5 });
		a.send(&sent).unwrap();

		assert_eq!(rx.recv().await.unwrap(), sent);
		assert_eq!(origin.context().get(&ns.key(SYNC_MESSAGE_KEY)), None);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn test_garbage_sentinel_is_dropped() {
		let origin = MemoryOrigin::new();
		let ns = Namespace::default();
		let writer = origin.context();
		let b = StorageTransport::new(Arc::new(origin.context()), &ns);

		let (tx, mut rx) = mpsc::unbounded_channel();
		b.on_message(Box::new(move |m| {
			let _ = tx.send(m);
		}));

		writer.set(&ns.key(SYNC_MESSAGE_KEY), "{not json").unwrap();
		let good = SyncMessage::new(TabId::from("tab_w"), 1, MessageBody::SyncRequest);
		writer.set(&ns.key(SYNC_MESSAGE_KEY), &good.to_json().unwrap()).unwrap();

		assert_eq!(rx.recv().await.unwrap(), good);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn test_disabled_store_fails_send() {
		let transport = StorageTransport::new(Arc::new(MemoryOrigin::disabled().context()), &Namespace::default());
		let message = SyncMessage::new(TabId::from("tab_a"), 0, MessageBody::TabOpen);
		assert!(matches!(transport.send(&message), Err(TransportError::Store(_))));
		transport.close();
		assert!(matches!(transport.send(&message), Err(TransportError::Closed)));
	}
}
