//! Message delivery between tabs.
//!
//! Two implementations share the [`Transport`] interface:
//! * [`BroadcastTransport`]: a named in-process channel, the analogue of a
//!   platform broadcast primitive
//! * [`StorageTransport`]: a sentinel-key pulse through the durable store,
//!   used when no broadcast primitive exists
//!
//! Neither delivers a tab's own messages back to it.

mod broadcast;
mod storage;

pub use broadcast::{BroadcastHub, BroadcastTransport};
pub use storage::{SYNC_MESSAGE_KEY, StorageTransport};

use crate::error::TransportError;
use crate::message::SyncMessage;

/// Callback receiving every decoded message from peers.
pub type MessageHandler = Box<dyn Fn(SyncMessage) + Send + Sync>;

/// Which delivery mechanism a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
	Broadcast,
	Storage,
}

/// Best-effort, fire-and-forget delivery to the other tabs of one origin.
pub trait Transport: Send + Sync {
	/// Delivery mechanism in use.
	fn kind(&self) -> TransportKind;

	/// Sends one message to every peer.
	fn send(&self, message: &SyncMessage) -> Result<(), TransportError>;

	/// Installs the receive callback and starts delivery.
	///
	/// Must be called from within a Tokio runtime. Only the first handler is
	/// installed.
	fn on_message(&self, handler: MessageHandler);

	/// Stops delivery in both directions. Idempotent.
	fn close(&self);
}
