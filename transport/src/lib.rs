//! Subprocess transport to the vendor social SDK.
//!
//! The SDK is a native library driven by a separate executable. This crate
//! spawns it, speaks line-delimited JSON over its stdio, correlates
//! responses to requests, applies per-command deadlines and watches stderr
//! for the out-of-band OAuth token marker.
//!
//! The rest of the workspace talks to the subprocess only through the
//! [`Transport`] trait so it can be replaced by a scripted fake in tests.

mod codec;
mod connection;
pub mod discovery;
mod env;
mod error;
mod process;
pub mod protocol;
mod token;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use cordlink_types::OAuthToken;

pub use discovery::{Discovered, DiscoveryError, DiscoveryOptions, discover};
pub use env::{ENV_SECRET_DENYLIST, is_secret_var};
pub use error::TransportError;
pub use process::{SubprocessTransport, TransportConfig};
pub use protocol::{Command, SecretString, TimeoutClass, TimeoutPolicy, decode};
pub use token::parse_token_marker;

pub type TransportFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;
pub type UnitFut<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Per-start options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Prepended to the platform library search path of the child.
    pub sdk_lib_dir: Option<PathBuf>,
}

/// The command channel to the SDK.
pub trait Transport: Send + Sync {
    /// Spawn the subprocess, terminating any existing instance first.
    fn start(&self, options: StartOptions) -> TransportFut<'_, ()>;

    /// Send one command and wait for its correlated response.
    fn send(&self, command: Command) -> TransportFut<'_, serde_json::Value>;

    /// Stop the subprocess. Idempotent.
    fn shutdown(&self) -> UnitFut<'_>;

    fn is_running(&self) -> bool;
}

/// Asynchronous notifications from a running transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// OAuth token material for the host to persist.
    TokenReceived(OAuthToken),
    /// The pipe closed or failed while the subprocess was supposed to be live.
    ConnectionLost { reason: String },
    /// The subprocess exited on its own.
    Exited { code: Option<i32> },
}

/// Event sender bound to one subprocess instance. Emissions from an
/// instance that has since been replaced or stopped are dropped.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<TransportEvent>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TransportEvent>, current: Arc<AtomicU64>, generation: u64) -> Self {
        Self {
            tx,
            current,
            generation,
        }
    }

    #[cfg(test)]
    pub fn detached(tx: mpsc::Sender<TransportEvent>) -> Self {
        Self::new(tx, Arc::new(AtomicU64::new(0)), 0)
    }

    pub async fn emit(&self, event: TransportEvent) {
        if self.current.load(Ordering::SeqCst) != self.generation {
            tracing::trace!(target: "cordlink::subprocess", ?event, "Dropping event from stale subprocess");
            return;
        }
        let _ = self.tx.send(event).await;
    }
}
