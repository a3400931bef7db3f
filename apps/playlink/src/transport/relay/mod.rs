//! Signaling over a relay-routed libp2p substream.

pub mod dial;
pub mod frame;
pub mod signaling;

pub use dial::{DialedSubstream, Libp2pDialer, RelayDialer, Substream};
pub use signaling::{SignalingChannel, SignalingHandler, SignalingWriter, dispatch};
