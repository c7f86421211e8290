//! HTTP relay client and the per-lobby relay poller.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use cordlink_types::{LobbyId, Message, MessageId};

use crate::error::{PollError, RelayError};
use crate::poller::{POLL_TARGET, PollFut, Poller};
use crate::{DeliveryChannel, MessageCreated, MonitoredLobbies, RelayArchive};

#[derive(Debug, Deserialize)]
struct LobbyMessagesBody {
    #[serde(default)]
    messages: Vec<Message>,
}

/// Client for the message relay's `GET /lobbies/{id}/messages`.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base: Url,
}

impl RelayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http, base })
    }

    pub async fn lobby_messages(&self, lobby_id: LobbyId) -> Result<Vec<Message>, RelayError> {
        let url = self.base.join(&format!("lobbies/{lobby_id}/messages"))?;
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body: LobbyMessagesBody = response.json().await?;
        Ok(body.messages)
    }
}

/// Polls the relay for every monitored lobby.
///
/// Each lobby keeps the set of ids already surfaced. The sets only grow
/// while the poller lives; a fresh poller starts empty.
pub struct RelayPoller {
    client: RelayClient,
    lobbies: MonitoredLobbies,
    archive: RelayArchive,
    seen: HashMap<LobbyId, HashSet<MessageId>>,
}

impl RelayPoller {
    #[must_use]
    pub fn new(client: RelayClient, lobbies: MonitoredLobbies, archive: RelayArchive) -> Self {
        Self {
            client,
            lobbies,
            archive,
            seen: HashMap::new(),
        }
    }

    async fn cycle(&mut self) -> Result<Vec<MessageCreated>, PollError> {
        let mut created = Vec::new();
        for lobby_id in self.lobbies.snapshot() {
            let messages = match self.client.lobby_messages(lobby_id).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(target: POLL_TARGET, %lobby_id, "Relay poll failed: {e}");
                    continue;
                }
            };
            let seen = self.seen.entry(lobby_id).or_default();
            for message in messages {
                if !seen.insert(message.id) {
                    continue;
                }
                created.push(MessageCreated {
                    message_id: message.id,
                    timestamp: message.timestamp.clone(),
                    channel: DeliveryChannel::Relay { lobby_id },
                });
                self.archive.insert(message);
            }
        }
        if !created.is_empty() {
            tracing::debug!(target: POLL_TARGET, count = created.len(), "New relay messages");
        }
        Ok(created)
    }
}

impl Poller for RelayPoller {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn poll(&mut self) -> PollFut<'_> {
        Box::pin(self.cycle())
    }
}
