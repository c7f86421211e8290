//! Fixed-interval scheduling for message pollers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::MessageCreated;
use crate::error::PollError;

pub(crate) const POLL_TARGET: &str = "cordlink::poll";

pub type PollFut<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<MessageCreated>, PollError>> + Send + 'a>>;

/// One independent delivery channel.
pub trait Poller: Send {
    fn name(&self) -> &'static str;

    /// Run one cycle and return the messages first seen in it.
    fn poll(&mut self) -> PollFut<'_>;
}

/// Drive `poller` every `every` until `stop` flips or the output closes.
///
/// A cycle runs inline, so a tick that fires while one is still in flight is
/// skipped rather than queued. Cycle errors are logged and the next tick
/// proceeds normally.
pub async fn run_poller<P: Poller>(
    mut poller: P,
    every: Duration,
    out: mpsc::Sender<MessageCreated>,
    mut stop: watch::Receiver<bool>,
) {
    let name = poller.name();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(target: POLL_TARGET, poller = name, ?every, "Poller started");

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop.borrow() {
            break;
        }

        let outcome = tokio::select! {
            outcome = poller.poll() => outcome,
            _ = stop.changed() => break,
        };
        match outcome {
            Ok(created) => {
                for event in created {
                    if out.send(event).await.is_err() {
                        tracing::debug!(target: POLL_TARGET, poller = name, "Output closed");
                        return;
                    }
                }
            }
            Err(e) if e.is_not_ready() => {
                tracing::trace!(target: POLL_TARGET, poller = name, "Skipped: {e}");
            }
            Err(e) => {
                tracing::warn!(target: POLL_TARGET, poller = name, "Poll cycle failed: {e}");
            }
        }
    }
    tracing::debug!(target: POLL_TARGET, poller = name, "Poller stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cordlink_types::MessageId;

    use super::*;
    use crate::DeliveryChannel;

    /// Emits one event per cycle; each cycle takes `latency`.
    struct Slow {
        latency: Duration,
        started: Arc<AtomicUsize>,
        fail_every_other: bool,
    }

    impl Poller for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn poll(&mut self) -> PollFut<'_> {
            Box::pin(async move {
                let cycle = self.started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.latency).await;
                if self.fail_every_other && cycle % 2 == 0 {
                    return Err(PollError::Relay(crate::RelayError::Status {
                        status: 500,
                        url: "http://relay".to_string(),
                    }));
                }
                Ok(vec![MessageCreated {
                    message_id: MessageId::new(cycle as u64 + 1),
                    timestamp: String::new(),
                    channel: DeliveryChannel::EventQueue,
                }])
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn busy_cycles_skip_ticks() {
        let started = Arc::new(AtomicUsize::new(0));
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = Slow {
            latency: Duration::from_millis(2500),
            started: started.clone(),
            fail_every_other: false,
        };
        let task = tokio::spawn(run_poller(poller, Duration::from_secs(1), out_tx, stop_rx));

        // Overdue ticks fire once on completion: cycles start at 0, 2.5, 5.0 and 7.5s.
        tokio::time::sleep(Duration::from_millis(8600)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 4);
        let mut received = 0;
        while out_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_does_not_halt_polling() {
        let started = Arc::new(AtomicUsize::new(0));
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = Slow {
            latency: Duration::from_millis(10),
            started: started.clone(),
            fail_every_other: true,
        };
        let task = tokio::spawn(run_poller(poller, Duration::from_secs(1), out_tx, stop_rx));

        let event = out_rx.recv().await.unwrap();
        assert_eq!(event.message_id, MessageId::new(2));
        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stop_sender_ends_poller() {
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = Slow {
            latency: Duration::from_millis(10),
            started: Arc::new(AtomicUsize::new(0)),
            fail_every_other: false,
        };
        let task = tokio::spawn(run_poller(poller, Duration::from_secs(1), out_tx, stop_rx));
        drop(stop_tx);
        task.await.unwrap();
    }
}
