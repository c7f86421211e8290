use thiserror::Error;

use cordlink_transport::TransportError;
use cordlink_types::ConnectionState;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Discord SDK is not ready (state: {state})")]
    NotReady { state: ConnectionState },
    #[error("Discord SDK initialize failed: {source}")]
    Initialize { source: TransportError },
    #[error("initialize was superseded by a disconnect")]
    Superseded,
    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        source: TransportError,
    },
}

impl SdkError {
    pub(crate) fn operation(operation: &'static str) -> impl FnOnce(TransportError) -> Self {
        move |source| Self::Operation { operation, source }
    }

    /// The underlying transport failure, if any.
    #[must_use]
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Initialize { source } | Self::Operation { source, .. } => Some(source),
            Self::NotReady { .. } | Self::Superseded => None,
        }
    }
}
