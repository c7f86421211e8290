use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::discovery::DiscoveryError;

/// Errors surfaced by the subprocess transport.
///
/// `Timeout` and `Command` are deliberately distinct: a timeout usually means
/// the subprocess or vendor library is stuck, while `Command` is an explicit
/// failure the SDK reported for a request it did process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn subprocess {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("subprocess is not running")]
    NotRunning,
    #[error("Command timeout: {command} ({}ms)", timeout.as_millis())]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },
    #[error("Command failed: {command}: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("connection to subprocess lost: {reason}")]
    ConnectionLost { reason: String },
    #[error("unexpected response shape for {command}: {source}")]
    Schema {
        command: &'static str,
        source: serde_json::Error,
    },
    #[error("subprocess I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl TransportError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::NotRunning)
    }
}
