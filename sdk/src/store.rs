use std::sync::{Mutex, PoisonError};

use cordlink_types::{LobbyId, LobbyRef};

/// Host-owned persistence for the "current lobby" record.
pub trait LobbyStore: Send + Sync {
    fn current(&self) -> Option<LobbyRef>;
    fn set_current(&self, lobby: Option<LobbyRef>);

    /// Clear the record only if it refers to `id`.
    fn clear_if(&self, id: LobbyId) {
        if self.current().is_some_and(|lobby| lobby.id == id) {
            self.set_current(None);
        }
    }
}

/// In-process store, used when the host supplies none.
#[derive(Debug, Default)]
pub struct MemoryLobbyStore {
    current: Mutex<Option<LobbyRef>>,
}

impl LobbyStore for MemoryLobbyStore {
    fn current(&self) -> Option<LobbyRef> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, lobby: Option<LobbyRef>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = lobby;
    }
}
