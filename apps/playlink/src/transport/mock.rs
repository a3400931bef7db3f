//! In-process stand-ins for the relay and the peer-connection engine, used by
//! unit and integration tests to script a host without any network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use playlink_proto::{
    IceCandidate, SessionDescription, SignalingMessage, decode_signaling, encode_signaling,
};
use serde_json::Value;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::TransportError;
use super::relay::frame::framed;
use super::relay::{DialedSubstream, RelayDialer};
use super::webrtc::engine::{
    DataChannel, MediaPacket, MediaTrack, PeerConnectionState, PeerConnector, PeerEvent,
    PeerEventSink, PeerHandle, TrackKind,
};
use crate::config::{ConfigError, RelayAddress};

/// Opus answer fragment the stereo rewrite keys on.
pub const MOCK_ANSWER_SDP: &str =
    "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=fmtp:111 minptime=10;useinbandfec=1\r\n";

const DUPLEX_CAPACITY: usize = 256 * 1024;

/// A well-formed relay address with a freshly generated peer id.
pub fn relay_address() -> Result<RelayAddress, ConfigError> {
    let peer = libp2p::identity::Keypair::generate_ed25519()
        .public()
        .to_peer_id();
    format!("/ip4/127.0.0.1/tcp/8088/p2p/{peer}").parse()
}

/// Outcome of the next dial handed to [`MockDialer`].
pub enum DialScript {
    Accept,
    Refuse(String),
}

/// Dialer that answers each dial from a script and hands the relay's end of
/// every accepted substream to the test.
pub struct MockDialer {
    script: Mutex<VecDeque<DialScript>>,
    accepted: mpsc::UnboundedSender<MockRelay>,
    dials: AtomicUsize,
}

impl MockDialer {
    /// Unscripted dials are accepted.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRelay>) {
        let (accepted, relays) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            accepted,
            dials: AtomicUsize::new(0),
        });
        (dialer, relays)
    }

    pub fn push(&self, step: DialScript) {
        self.script.lock().push_back(step);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayDialer for MockDialer {
    async fn dial(
        &self,
        _relay: &RelayAddress,
        _protocol: &str,
    ) -> Result<DialedSubstream, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(DialScript::Accept);
        match step {
            DialScript::Refuse(reason) => Err(TransportError::Dial(reason)),
            DialScript::Accept => {
                let (local, remote) = duplex(DUPLEX_CAPACITY);
                let _ = self.accepted.send(MockRelay {
                    framed: framed(remote),
                });
                Ok(DialedSubstream::new(Box::new(local)))
            }
        }
    }
}

/// The relay's end of one signaling substream.
pub struct MockRelay {
    framed: Framed<DuplexStream, LengthDelimitedCodec>,
}

impl MockRelay {
    /// Next frame from the client as raw JSON, `None` once it hung up.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let frame = self.framed.next().await?.ok()?;
        serde_json::from_slice(&frame).ok()
    }

    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        let frame = self.framed.next().await?.ok()?;
        decode_signaling(&frame).ok().flatten()
    }

    pub async fn send(&mut self, message: &SignalingMessage) {
        if let Ok(payload) = encode_signaling(message, None) {
            self.send_raw(&payload).await;
        }
    }

    pub async fn send_raw(&mut self, payload: &[u8]) {
        let _ = self.framed.send(Bytes::copy_from_slice(payload)).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    SetRemote(String),
    CreateAnswer,
    SetLocal(String),
    AddCandidate(String),
    Close,
}

/// Engine whose peers record every call and let the test inject events.
pub struct MockConnector {
    peers: Mutex<Vec<Arc<MockPeer>>>,
    created: watch::Sender<usize>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    fail_setup: AtomicBool,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            created: watch::channel(0).0,
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
            fail_setup: AtomicBool::new(false),
        }
    }
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `connect` fail with a setup error.
    pub fn fail_setup(&self) {
        self.fail_setup.store(true, Ordering::SeqCst);
    }

    /// Waits until at least `count` peers have been created and returns the
    /// last one.
    pub async fn wait_for_peer(&self, count: usize) -> Arc<MockPeer> {
        let mut created = self.created.subscribe();
        let _ = created.wait_for(|n| *n >= count).await;
        self.peers.lock()[count - 1].clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn live_peers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open peers seen so far.
    pub fn max_live_peers(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        ice_servers: &[String],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerHandle>, TransportError> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(TransportError::Setup("mock engine unavailable".into()));
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        let peer = Arc::new(MockPeer {
            events,
            ice_servers: ice_servers.to_vec(),
            calls: Mutex::new(Vec::new()),
            fps: Mutex::new(None),
            fps_polls: AtomicUsize::new(0),
            transport_connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            live: self.live.clone(),
        });
        let count = {
            let mut peers = self.peers.lock();
            peers.push(peer.clone());
            peers.len()
        };
        self.created.send_replace(count);
        Ok(peer)
    }
}

pub struct MockPeer {
    events: PeerEventSink,
    pub ice_servers: Vec<String>,
    calls: Mutex<Vec<PeerCall>>,
    fps: Mutex<Option<f64>>,
    fps_polls: AtomicUsize,
    transport_connected: AtomicBool,
    closed: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl MockPeer {
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    /// Reports an audio and a video track followed by `connected`; returns
    /// the tracks so the test can observe them.
    pub fn connect_media(&self) -> (Arc<MockTrack>, Arc<MockTrack>) {
        let audio = MockTrack::new(TrackKind::Audio);
        let video = MockTrack::new(TrackKind::Video);
        self.emit(PeerEvent::Track(audio.clone()));
        self.emit(PeerEvent::Track(video.clone()));
        self.emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        (audio, video)
    }

    pub fn set_fps(&self, fps: Option<f64>) {
        *self.fps.lock() = fps;
    }

    pub fn fps_polls(&self) -> usize {
        self.fps_polls.load(Ordering::SeqCst)
    }

    pub fn set_transport_connected(&self, connected: bool) {
        self.transport_connected.store(connected, Ordering::SeqCst);
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerHandle for MockPeer {
    async fn set_remote_description(
        &self,
        offer: SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(PeerCall::SetRemote(offer.sdp));
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(MOCK_ANSWER_SDP))
    }

    async fn set_local_description(
        &self,
        answer: SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(PeerCall::SetLocal(answer.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.record(PeerCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn inbound_video_fps(&self) -> Option<f64> {
        self.fps_polls.fetch_add(1, Ordering::SeqCst);
        *self.fps.lock()
    }

    fn transport_connected(&self) -> bool {
        self.transport_connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.record(PeerCall::Close);
        }
    }
}

pub struct MockTrack {
    kind: TrackKind,
    live: AtomicBool,
    playout_updates: AtomicUsize,
    playout_delay: Mutex<Option<Duration>>,
}

impl MockTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            live: AtomicBool::new(true),
            playout_updates: AtomicUsize::new(0),
            playout_delay: Mutex::new(None),
        })
    }

    pub fn playout_updates(&self) -> usize {
        self.playout_updates.load(Ordering::SeqCst)
    }

    pub fn end(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaTrack for MockTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn id(&self) -> String {
        format!("mock-{}", self.kind.as_str())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn set_playout_delay(&self, delay: Duration) {
        self.playout_updates.fetch_add(1, Ordering::SeqCst);
        *self.playout_delay.lock() = Some(delay);
    }

    fn playout_delay(&self) -> Option<Duration> {
        *self.playout_delay.lock()
    }

    async fn read_packet(&self) -> Result<MediaPacket, TransportError> {
        if !self.is_live() {
            return Err(TransportError::ChannelClosed);
        }
        Ok(MediaPacket {
            sequence_number: 0,
            timestamp: 0,
            marker: true,
            payload: Bytes::new(),
        })
    }

    async fn stop(&self) {
        self.end();
    }
}

/// Data channel that records what is sent while open.
pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn close(&self) {
        self.set_open(false);
    }
}
