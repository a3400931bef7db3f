pub mod mock;
pub mod relay;
pub mod webrtc;

use playlink_proto::WireError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("failed to open signaling substream: {0}")]
    Substream(String),
    #[error("signaling channel closed")]
    ChannelClosed,
    #[error("signaling i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signaling decode error: {0}")]
    Wire(#[from] WireError),
    #[error("peer connection setup failed: {0}")]
    Setup(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl TransportError {
    /// Construction-time failures that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Setup(_))
    }
}

pub(crate) fn to_setup_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Setup(err.to_string())
}

pub(crate) fn to_negotiation_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Negotiation(err.to_string())
}
