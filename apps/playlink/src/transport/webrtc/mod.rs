//! Media session transport: the peer-connection seam, its webrtc-rs backing
//! and the answer side of offer/answer negotiation.

pub mod engine;
pub mod ice;
pub mod native;
pub mod negotiator;
pub mod playout;
pub mod sdp;

pub use engine::{
    AttemptId, DataChannel, IceConnectionState, IceGatheringState, MediaPacket, MediaTrack,
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerHandle, TrackKind,
};
pub use native::NativeConnector;
pub use negotiator::{NegotiationStatus, SessionNegotiator};
pub use playout::spawn_low_latency_playout;
