use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use cordlink_sdk::AdapterSlot;

use crate::poller::{POLL_TARGET, run_poller};
use crate::{
    DmPoller, EventQueuePoller, MonitoredLobbies, Notification, Reconciler, RelayArchive,
    RelayClient, RelayPoller,
};

const SIGNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub event_queue_interval: Duration,
    pub relay_interval: Duration,
    pub dm_interval: Duration,
    pub dm_enabled: bool,
    pub dm_history_limit: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            event_queue_interval: Duration::from_millis(1000),
            relay_interval: Duration::from_millis(2000),
            dm_interval: Duration::from_millis(5000),
            dm_enabled: false,
            dm_history_limit: 20,
        }
    }
}

/// Running pollers plus the reconciler that merges them.
///
/// Seen sets live as long as this value. An account switch should stop it
/// and spawn a fresh one alongside [`AdapterSlot::reset`].
pub struct Delivery {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Delivery {
    /// Start every poller. The relay poller only runs when `relay` is set.
    #[must_use]
    pub fn spawn(
        config: &DeliveryConfig,
        slot: Arc<AdapterSlot>,
        relay: Option<RelayClient>,
        lobbies: MonitoredLobbies,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (stop, stop_rx) = watch::channel(false);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let archive = RelayArchive::default();
        let mut tasks = Vec::with_capacity(4);

        tasks.push(tokio::spawn(run_poller(
            EventQueuePoller::new(slot.clone()),
            config.event_queue_interval,
            signal_tx.clone(),
            stop_rx.clone(),
        )));
        match relay {
            Some(client) => tasks.push(tokio::spawn(run_poller(
                RelayPoller::new(client, lobbies, archive.clone()),
                config.relay_interval,
                signal_tx.clone(),
                stop_rx.clone(),
            ))),
            None => tracing::info!(target: POLL_TARGET, "No relay configured; relay poller disabled"),
        }
        tasks.push(tokio::spawn(run_poller(
            DmPoller::new(
                slot.clone(),
                archive.clone(),
                config.dm_enabled,
                config.dm_history_limit,
            ),
            config.dm_interval,
            signal_tx,
            stop_rx,
        )));
        tasks.push(tokio::spawn(
            Reconciler::new(slot, archive).run(signal_rx, notify_tx),
        ));

        (Self { stop, tasks }, notify_rx)
    }

    /// Stop every poller and wait for the reconciler to drain.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(target: POLL_TARGET, "Delivery task failed: {e}");
            }
        }
    }
}
