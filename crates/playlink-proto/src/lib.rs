//! Wire definitions shared by the playlink client and anything that speaks to
//! the game host: latency traces, input events, the binary data-channel
//! envelope, and the JSON signaling messages carried over the relay substream.
//! Kept free of runtime dependencies so the codecs can be reused by tools.

pub mod envelope;
pub mod input;
pub mod latency;
pub mod signaling;
mod wire;

pub use envelope::{Envelope, Payload, PayloadType, decode_envelope, encode_envelope};
pub use input::InputEvent;
pub use latency::{LatencyTrace, StageStamp};
pub use signaling::{
    AnswerBody, AnswerType, IceCandidate, JoinerType, SdpType, SessionDescription,
    SignalingMessage, decode_signaling, encode_signaling,
};
pub use wire::WireError;

/// Binary envelope protocol version, packed into the top three header bits.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest signaling frame accepted on the relay substream.
pub const MAX_SIGNALING_FRAME: usize = 1024 * 1024;
