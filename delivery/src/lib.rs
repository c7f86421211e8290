//! Message delivery across three independent channels.
//!
//! The SDK event queue, the HTTP relay and the (normally disabled) per-friend
//! DM history each run as a [`Poller`] on their own interval. Their output is
//! merged by the [`Reconciler`] into one deduplicated [`Notification`] stream.

mod dm;
mod error;
mod event_queue;
mod poller;
mod reconciler;
mod relay;
mod service;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cordlink_types::{LobbyId, Message, MessageId, UserId};

pub use dm::DmPoller;
pub use error::{PollError, RelayError};
pub use event_queue::EventQueuePoller;
pub use poller::{PollFut, Poller, run_poller};
pub use reconciler::{
    ArchiveLookup, LookupFut, MessageLookup, Notification, Reconciler, SDK_LOOKUP_TIMEOUT,
    SdkLookup,
};
pub use relay::{RelayClient, RelayPoller};
pub use service::{Delivery, DeliveryConfig};

/// Where a "message created" signal came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryChannel {
    EventQueue,
    Relay { lobby_id: LobbyId },
    DirectMessage { user_id: UserId },
}

/// A new message was seen. Carries no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCreated {
    pub message_id: MessageId,
    pub timestamp: String,
    pub channel: DeliveryChannel,
}

/// Lobby ids the relay poller watches. Shared with whoever joins lobbies.
#[derive(Debug, Clone, Default)]
pub struct MonitoredLobbies(Arc<RwLock<BTreeSet<LobbyId>>>);

impl MonitoredLobbies {
    /// Returns false if the lobby was already monitored.
    pub fn insert(&self, lobby_id: LobbyId) -> bool {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(lobby_id)
    }

    pub fn remove(&self, lobby_id: LobbyId) -> bool {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&lobby_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<LobbyId> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

/// Bodies already downloaded by a poller, keyed by id.
///
/// Lets the reconciler resolve relay and DM messages without a second round
/// trip through the subprocess.
#[derive(Debug, Clone, Default)]
pub struct RelayArchive(Arc<Mutex<HashMap<MessageId, Message>>>);

impl RelayArchive {
    pub fn insert(&self, message: Message) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message.id, message);
    }

    #[must_use]
    pub fn get(&self, message_id: MessageId) -> Option<Message> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message_id)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod testing {
    use std::sync::Arc;

    use cordlink_sdk::testing::ScriptedTransport;
    use cordlink_sdk::{AdapterConfig, AdapterSlot, MemoryLobbyStore, SdkAdapter};

    pub(crate) fn slot_with(transport: &Arc<ScriptedTransport>) -> Arc<AdapterSlot> {
        let transport = transport.clone();
        Arc::new(AdapterSlot::new(move || {
            SdkAdapter::new(
                transport.clone(),
                Arc::new(MemoryLobbyStore::default()),
                AdapterConfig::default(),
            )
        }))
    }
}
