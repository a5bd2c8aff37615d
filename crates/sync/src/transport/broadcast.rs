use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{MessageHandler, Transport, TransportKind};
use crate::error::TransportError;
use crate::message::SyncMessage;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
	endpoint: u64,
	message: SyncMessage,
}

#[derive(Default)]
struct Channels {
	next_endpoint: u64,
	senders: HashMap<String, broadcast::Sender<Envelope>>,
}

/// Registry of named broadcast channels shared by every tab of one origin.
///
/// Cloning yields another handle onto the same registry.
#[derive(Clone, Default)]
pub struct BroadcastHub {
	channels: Arc<Mutex<Channels>>,
}

impl std::fmt::Debug for BroadcastHub {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let channels = self.channels.lock();
		f.debug_struct("BroadcastHub")
			.field("channels", &channels.senders.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl BroadcastHub {
	pub fn new() -> Self {
		Self::default()
	}

	/// Joins `channel`, creating it on first use.
	///
	/// The returned endpoint buffers messages from the moment it is opened,
	/// even before a handler is installed.
	pub fn open(&self, channel: &str) -> BroadcastTransport {
		let mut channels = self.channels.lock();
		channels.next_endpoint += 1;
		let endpoint = channels.next_endpoint;
		let tx = channels
			.senders
			.entry(channel.to_string())
			.or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
			.clone();
		let rx = tx.subscribe();
		debug!(channel, endpoint, "sync.broadcast.open");
		BroadcastTransport {
			channel: channel.to_string(),
			endpoint,
			tx,
			rx: Mutex::new(Some(rx)),
			cancel: CancellationToken::new(),
			closed: AtomicBool::new(false),
		}
	}

	/// Number of open endpoints on `channel`.
	pub fn endpoints(&self, channel: &str) -> usize {
		self.channels
			.lock()
			.senders
			.get(channel)
			.map_or(0, broadcast::Sender::receiver_count)
	}
}

/// One tab's endpoint on a [`BroadcastHub`] channel.
#[derive(Debug)]
pub struct BroadcastTransport {
	channel: String,
	endpoint: u64,
	tx: broadcast::Sender<Envelope>,
	rx: Mutex<Option<broadcast::Receiver<Envelope>>>,
	cancel: CancellationToken,
	closed: AtomicBool,
}

impl Transport for BroadcastTransport {
	fn kind(&self) -> TransportKind {
		TransportKind::Broadcast
	}

	fn send(&self, message: &SyncMessage) -> Result<(), TransportError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(TransportError::Closed);
		}
		let envelope = Envelope {
			endpoint: self.endpoint,
			message: message.clone(),
		};
		// Only fails when nobody is listening.
		let _ = self.tx.send(envelope);
		trace!(channel = %self.channel, kind = message.body.kind(), "sync.broadcast.send");
		Ok(())
	}

	fn on_message(&self, handler: MessageHandler) {
		let Some(mut rx) = self.rx.lock().take() else {
			warn!(channel = %self.channel, "sync.broadcast.handler_ignored");
			return;
		};
		let cancel = self.cancel.clone();
		let endpoint = self.endpoint;
		let channel = self.channel.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					received = rx.recv() => match received {
						Ok(envelope) if envelope.endpoint == endpoint => {}
						Ok(envelope) => handler(envelope.message),
						Err(broadcast::error::RecvError::Lagged(skipped)) => {
							warn!(%channel, skipped, "sync.broadcast.lagged");
						}
						Err(broadcast::error::RecvError::Closed) => break,
					},
				}
			}
			trace!(%channel, endpoint, "sync.broadcast.pump_stopped");
		});
	}

	fn close(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.cancel.cancel();
		self.rx.lock().take();
		debug!(channel = %self.channel, endpoint = self.endpoint, "sync.broadcast.close");
	}
}
