use thiserror::Error;

use cordlink_sdk::SdkError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
}

/// A failed poll cycle. Logged by the scheduler, never propagated further.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Sdk(#[from] SdkError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl PollError {
    /// The adapter is simply not connected; expected while signed out.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::Sdk(SdkError::NotReady { .. }))
    }
}
