//! Cross-tab synchronization for the application state store.
//!
//! Independent tabs of one origin share a durable [`KvStore`](lft_storage::KvStore)
//! and, when available, a broadcast channel. This crate keeps them eventually
//! consistent:
//! * [`SyncMessage`]: the six-kind wire protocol
//! * [`Transport`]: broadcast delivery, or a storage-pulse fallback
//! * [`SyncManager`]: tab identity, leader election, key gating, initial sync
//!
//! Conflict resolution is last-writer-wins; leadership is decided by the
//! earliest claim in the durable claim record.

pub mod config;
pub mod error;
mod manager;
pub mod message;
pub mod tab;
pub mod transport;

pub use config::SyncConfig;
pub use error::{ConfigError, TransportError};
pub use manager::{ClaimRecord, LEADER_CLAIM_KEY, SyncEvent, SyncManager, SyncSource};
pub use message::{MessageBody, SyncData, SyncMessage};
pub use tab::TabId;
pub use transport::{BroadcastHub, BroadcastTransport, MessageHandler, StorageTransport, Transport, TransportKind};
