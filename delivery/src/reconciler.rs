//! Downstream merge of every poller into one notification stream.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cordlink_sdk::AdapterSlot;
use cordlink_types::{Message, MessageId};

use crate::poller::POLL_TARGET;
use crate::{DeliveryChannel, MessageCreated, RelayArchive};

pub type LookupFut<'a> = Pin<Box<dyn Future<Output = Option<Message>> + Send + 'a>>;

/// One source of full message details, tried in order.
pub trait MessageLookup: Send + Sync {
    fn name(&self) -> &'static str;

    fn lookup(&self, message_id: MessageId) -> LookupFut<'_>;
}

/// Bodies the relay and DM pollers already downloaded.
pub struct ArchiveLookup(RelayArchive);

impl ArchiveLookup {
    #[must_use]
    pub fn new(archive: RelayArchive) -> Self {
        Self(archive)
    }
}

impl MessageLookup for ArchiveLookup {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn lookup(&self, message_id: MessageId) -> LookupFut<'_> {
        let found = self.0.get(message_id);
        Box::pin(async move { found })
    }
}

/// Upper bound on one `get_message` lookup, well under the command deadline.
pub const SDK_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// `get_message` through whichever adapter is current.
pub struct SdkLookup(Arc<AdapterSlot>);

impl SdkLookup {
    #[must_use]
    pub fn new(slot: Arc<AdapterSlot>) -> Self {
        Self(slot)
    }
}

impl MessageLookup for SdkLookup {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn lookup(&self, message_id: MessageId) -> LookupFut<'_> {
        Box::pin(async move {
            let adapter = self.0.current();
            match tokio::time::timeout(SDK_LOOKUP_TIMEOUT, adapter.get_message(message_id)).await {
                Ok(Ok(message)) => Some(message),
                Ok(Err(e)) => {
                    tracing::debug!(target: POLL_TARGET, %message_id, "get_message failed: {e}");
                    None
                }
                Err(_) => {
                    tracing::debug!(target: POLL_TARGET, %message_id, "get_message gave up");
                    None
                }
            }
        })
    }
}

/// A resolved, deduplicated new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: Message,
    pub author_display: String,
    /// The channel that surfaced the message first.
    pub channel: DeliveryChannel,
}

pub struct Reconciler {
    slot: Arc<AdapterSlot>,
    lookups: Vec<Box<dyn MessageLookup>>,
    seen: HashSet<MessageId>,
}

impl Reconciler {
    /// Archive first, then the SDK.
    #[must_use]
    pub fn new(slot: Arc<AdapterSlot>, archive: RelayArchive) -> Self {
        let lookups: Vec<Box<dyn MessageLookup>> = vec![
            Box::new(ArchiveLookup::new(archive)),
            Box::new(SdkLookup::new(slot.clone())),
        ];
        Self::with_lookups(slot, lookups)
    }

    #[must_use]
    pub fn with_lookups(slot: Arc<AdapterSlot>, lookups: Vec<Box<dyn MessageLookup>>) -> Self {
        Self {
            slot,
            lookups,
            seen: HashSet::new(),
        }
    }

    /// Resolve one signal. `None` for duplicates and unresolvable ids.
    ///
    /// An id that cannot be resolved is forgotten again so the next channel
    /// to report it gets another attempt.
    pub async fn handle(&mut self, created: MessageCreated) -> Option<Notification> {
        let message_id = created.message_id;
        if !self.seen.insert(message_id) {
            tracing::trace!(target: POLL_TARGET, %message_id, "Duplicate signal");
            return None;
        }

        let mut message = None;
        for lookup in &self.lookups {
            if let Some(found) = lookup.lookup(message_id).await {
                tracing::trace!(target: POLL_TARGET, %message_id, source = lookup.name(), "Resolved");
                message = Some(found);
                break;
            }
        }
        let Some(message) = message else {
            tracing::debug!(target: POLL_TARGET, %message_id, "Message details unavailable");
            self.seen.remove(&message_id);
            return None;
        };

        let author_display = self.slot.current().display_name(message.author_id).await;
        Some(Notification {
            message,
            author_display,
            channel: created.channel,
        })
    }

    /// Consume signals until every poller has hung up or `out` closes.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<MessageCreated>,
        out: mpsc::Sender<Notification>,
    ) {
        while let Some(created) = input.recv().await {
            let Some(notification) = self.handle(created).await else {
                continue;
            };
            if out.send(notification).await.is_err() {
                break;
            }
        }
    }
}
