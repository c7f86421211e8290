//! Request/response correlation over a line-delimited JSON pipe.
//!
//! A [`Connection`] owns a writer task fed by an mpsc channel and a reader
//! task that routes responses to per-request oneshot senders by id. It is
//! generic over the byte streams so tests can drive it with in-memory pipes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::{LineReader, LineWriter};
use crate::error::TransportError;
use crate::protocol::{Command, Request, Response, TimeoutPolicy};
use crate::{EventSink, TransportEvent};

const WRITER_CHANNEL_CAPACITY: usize = 64;

pub(crate) const LOG_TARGET: &str = "cordlink::subprocess";

/// Request ids are process-wide and never reused, even across restarts.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

struct PendingRequest {
    command: &'static str,
    tx: oneshot::Sender<Result<serde_json::Value, TransportError>>,
}

struct PendingTable {
    /// Cleared once the pipe is gone; later registrations are refused.
    open: bool,
    requests: HashMap<u64, PendingRequest>,
}

#[derive(Clone)]
struct Pending(Arc<Mutex<PendingTable>>);

impl Pending {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(PendingTable {
            open: true,
            requests: HashMap::new(),
        })))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        id: u64,
        command: &'static str,
    ) -> Option<oneshot::Receiver<Result<serde_json::Value, TransportError>>> {
        let mut table = self.lock();
        if !table.open {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        table.requests.insert(id, PendingRequest { command, tx });
        Some(rx)
    }

    fn remove(&self, id: u64) -> Option<PendingRequest> {
        self.lock().requests.remove(&id)
    }

    /// Reject every outstanding request and refuse new ones.
    fn abandon_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.lock();
            table.open = false;
            table.requests.drain().map(|(_, req)| req).collect()
        };
        let count = drained.len();
        for req in drained {
            let _ = req.tx.send(Err(TransportError::ConnectionLost {
                reason: reason.to_string(),
            }));
        }
        count
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn len(&self) -> usize {
        self.lock().requests.len()
    }
}

pub(crate) struct Connection {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: Pending,
    policy: TimeoutPolicy,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl Connection {
    /// Start the reader and writer tasks over `reader` (subprocess stdout)
    /// and `writer` (subprocess stdin).
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        policy: TimeoutPolicy,
        events: EventSink,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = Pending::new();

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_pending = pending.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = LineWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(target: LOG_TARGET, "Subprocess write error: {e}");
                            writer_pending.abandon_all(&format!("write failed: {e}"));
                            break;
                        }
                    }
                    WriterCommand::Shutdown => {
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = LineReader::new(reader);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => Self::dispatch_frame(frame, &reader_pending),
                    Ok(None) => break "subprocess closed stdout".to_string(),
                    Err(e) => break format!("read failed: {e}"),
                }
            };
            let abandoned = reader_pending.abandon_all(&reason);
            tracing::info!(target: LOG_TARGET, abandoned, "Subprocess connection ended: {reason}");
            events.emit(TransportEvent::ConnectionLost { reason }).await;
        });

        Self {
            writer_tx,
            pending,
            policy,
            reader_handle,
            writer_handle,
        }
    }

    fn dispatch_frame(frame: serde_json::Value, pending: &Pending) {
        let response = match serde_json::from_value::<Response>(frame) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, "Ignoring response without id/success: {e}");
                return;
            }
        };
        let Some(request) = pending.remove(response.id) else {
            tracing::debug!(
                target: LOG_TARGET,
                id = response.id,
                "Response for unknown or expired request"
            );
            return;
        };
        let _ = request.tx.send(response.into_outcome(request.command));
    }

    pub fn is_open(&self) -> bool {
        self.pending.is_open() && !self.writer_tx.is_closed()
    }

    pub async fn send(&self, command: &Command) -> Result<serde_json::Value, TransportError> {
        let name = command.name();
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let Some(rx) = self.pending.register(id, name) else {
            return Err(TransportError::NotRunning);
        };

        let frame = match serde_json::to_value(Request { id, command }) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.remove(id);
                return Err(TransportError::Io(e.into()));
            }
        };

        if command.is_quiet() {
            tracing::trace!(target: "cordlink::poll", id, command = name, "request");
        } else {
            tracing::debug!(target: LOG_TARGET, id, command = name, "request");
        }

        // One deadline covers both the enqueue and the reply.
        let timeout = self.policy.for_command(command);
        let deadline = Instant::now() + timeout;
        let expired = || {
            self.pending.remove(id);
            tracing::warn!(target: LOG_TARGET, id, command = name, "Command timed out");
            TransportError::Timeout {
                command: name,
                timeout,
            }
        };

        match tokio::time::timeout_at(deadline, self.writer_tx.send(WriterCommand::Send(frame)))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.pending.remove(id);
                return Err(TransportError::NotRunning);
            }
            Err(_) => return Err(expired()),
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.pending.remove(id);
                Err(TransportError::ConnectionLost {
                    reason: "response channel dropped".to_string(),
                })
            }
            Err(_) => Err(expired()),
        }
    }

    /// Close stdin so the subprocess sees EOF. Never waits on a backed-up
    /// writer; the caller's kill path handles a child that stopped reading.
    pub fn close_input(&self) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.writer_tx.try_send(WriterCommand::Shutdown)
        {
            tracing::debug!(target: LOG_TARGET, "Writer backed up; stdin left open");
        }
    }

    /// Reject all outstanding requests with `reason`.
    pub fn abandon_all(&self, reason: &str) -> usize {
        self.pending.abandon_all(reason)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pending.abandon_all("connection dropped");
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
