//! SDK adapter layer.
//!
//! Wraps a [`cordlink_transport::Transport`] with a connection state machine,
//! TTL caches for slow-changing data (lobby ids, friends, guild channels)
//! and one typed method per SDK operation.

mod adapter;
mod cache;
mod error;
mod slot;
mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{AdapterConfig, SdkAdapter};
pub use error::SdkError;
pub use slot::AdapterSlot;
pub use store::{LobbyStore, MemoryLobbyStore};
