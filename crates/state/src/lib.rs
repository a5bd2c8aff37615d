//! Reactive application state store.
//!
//! [`StateManager`] owns the canonical state tree of one execution context:
//! * reads return deep, independent copies
//! * writes are equality-gated: identical values never notify
//! * global and per-slice listeners, each with an unsubscribe handle
//! * memoized selectors whose cache is dropped wholesale on every write
//! * hydration from and persistence to a [`KvStore`](lft_storage::KvStore)

pub mod error;
mod manager;
mod persist;
pub mod state;
pub mod value;

pub use error::{Result, StateError};
pub use manager::{StateManager, Subscription};
pub use persist::PersistReport;
pub use state::{State, default_state, slices};
pub use value::{Record, Value, ValueMap, ValueSet};
