use std::sync::Arc;

use cordlink_sdk::AdapterSlot;

use crate::error::PollError;
use crate::poller::{PollFut, Poller};
use crate::{DeliveryChannel, MessageCreated};

/// Drains the SDK's pending "message created" queue.
///
/// Events carry only an id and timestamp; the reconciler fetches bodies.
pub struct EventQueuePoller {
    slot: Arc<AdapterSlot>,
}

impl EventQueuePoller {
    #[must_use]
    pub fn new(slot: Arc<AdapterSlot>) -> Self {
        Self { slot }
    }

    async fn cycle(&mut self) -> Result<Vec<MessageCreated>, PollError> {
        let events = self.slot.current().drain_message_events().await?;
        Ok(events
            .into_iter()
            .map(|event| MessageCreated {
                message_id: event.message_id,
                timestamp: event.timestamp,
                channel: DeliveryChannel::EventQueue,
            })
            .collect())
    }
}

impl Poller for EventQueuePoller {
    fn name(&self) -> &'static str {
        "event-queue"
    }

    fn poll(&mut self) -> PollFut<'_> {
        Box::pin(self.cycle())
    }
}
