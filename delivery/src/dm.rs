use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cordlink_sdk::AdapterSlot;
use cordlink_types::{MessageId, UserId};

use crate::error::PollError;
use crate::poller::{POLL_TARGET, PollFut, Poller};
use crate::{DeliveryChannel, MessageCreated, RelayArchive};

/// Legacy per-friend DM history poller.
///
/// DM history through the SDK does not deliver new messages reliably, so
/// this poller is off by default. Disabled, it never issues a command.
pub struct DmPoller {
    slot: Arc<AdapterSlot>,
    archive: RelayArchive,
    enabled: bool,
    history_limit: u32,
    seen: HashMap<UserId, HashSet<MessageId>>,
}

impl DmPoller {
    #[must_use]
    pub fn new(slot: Arc<AdapterSlot>, archive: RelayArchive, enabled: bool, history_limit: u32) -> Self {
        Self {
            slot,
            archive,
            enabled,
            history_limit,
            seen: HashMap::new(),
        }
    }

    async fn cycle(&mut self) -> Result<Vec<MessageCreated>, PollError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let adapter = self.slot.current();
        let friends = adapter.get_friends().await?;

        let mut created = Vec::new();
        for friend in friends {
            let messages = match adapter.get_user_messages(friend.id, self.history_limit).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::debug!(target: POLL_TARGET, user_id = %friend.id, "DM history fetch failed: {e}");
                    continue;
                }
            };
            let seen = self.seen.entry(friend.id).or_default();
            for message in messages {
                if !seen.insert(message.id) {
                    continue;
                }
                created.push(MessageCreated {
                    message_id: message.id,
                    timestamp: message.timestamp.clone(),
                    channel: DeliveryChannel::DirectMessage { user_id: friend.id },
                });
                self.archive.insert(message);
            }
        }
        Ok(created)
    }
}

impl Poller for DmPoller {
    fn name(&self) -> &'static str {
        "dm"
    }

    fn poll(&mut self) -> PollFut<'_> {
        Box::pin(self.cycle())
    }
}
