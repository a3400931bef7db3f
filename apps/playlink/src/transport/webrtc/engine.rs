//! Seams between session negotiation and the native peer-connection engine.
//!
//! The production engine is webrtc-rs (see `native`); tests drive the same
//! traits with the scriptable engine in `transport::mock`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use playlink_proto::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// One received RTP packet, header fields flattened.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub marker: bool,
    pub payload: Bytes,
}

#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn id(&self) -> String;
    /// False once the track has been stopped or its source ended.
    fn is_live(&self) -> bool;
    /// Target playout (jitter buffer) delay for this receiver.
    fn set_playout_delay(&self, delay: Duration);
    fn playout_delay(&self) -> Option<Duration>;
    async fn read_packet(&self) -> Result<MediaPacket, TransportError>;
    async fn stop(&self);
}

impl fmt::Debug for dyn MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn is_open(&self) -> bool;
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;
    async fn close(&self);
}

impl fmt::Debug for dyn DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("label", &self.label())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Raw sub-state reports from the engine. The supervisor derives the coarse
/// connection state from these.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    ConnectionState(PeerConnectionState),
    IceConnectionState(IceConnectionState),
    IceGatheringState(IceGatheringState),
    LocalCandidate(IceCandidate),
    Track(Arc<dyn MediaTrack>),
    DataChannel(Arc<dyn DataChannel>),
    DataChannelOpen { label: String },
    DataChannelClosed { label: String },
    DataChannelMessage { label: String, len: usize },
}

pub type AttemptId = u64;

/// Where an engine reports events for one connection attempt. Every event is
/// stamped with the attempt so a supervisor can drop reports from a peer it
/// has already replaced.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<(AttemptId, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<(AttemptId, PeerEvent)>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn emit(&self, event: PeerEvent) {
        if self.tx.send((self.attempt, event)).is_err() {
            tracing::trace!(target: "playlink::webrtc", attempt = self.attempt, "peer event dropped after supervisor exit");
        }
    }
}

#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn set_remote_description(&self, offer: SessionDescription)
    -> Result<(), TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(&self, answer: SessionDescription)
    -> Result<(), TransportError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;
    /// Frames per second of the inbound video stream, once the engine can
    /// report it.
    async fn inbound_video_fps(&self) -> Option<f64>;
    /// Whether the underlying ICE/DTLS transport is currently connected.
    fn transport_connected(&self) -> bool;
    async fn close(&self);
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        ice_servers: &[String],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerHandle>, TransportError>;
}
