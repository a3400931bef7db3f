use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use playlink_proto::{IceCandidate, SdpType, SessionDescription};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use super::engine::{
    DataChannel, IceConnectionState, IceGatheringState, MediaPacket, MediaTrack,
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerHandle, TrackKind,
};
use crate::transport::{TransportError, to_negotiation_error, to_setup_error};

/// Minimum observation window before a frame rate is reported.
const FPS_WINDOW: Duration = Duration::from_secs(1);

fn build_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(SettingEngine::default())
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Peer connections backed by webrtc-rs.
#[derive(Debug, Default, Clone)]
pub struct NativeConnector;

#[async_trait]
impl PeerConnector for NativeConnector {
    async fn connect(
        &self,
        ice_servers: &[String],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerHandle>, TransportError> {
        let api = build_api()?;
        let mut config = RTCConfiguration::default();
        if !ice_servers.is_empty() {
            config.ice_servers = vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }];
        }
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(to_setup_error)?);
        let video_meter = Arc::new(FrameRateMeter::default());
        register_handlers(&pc, &events, &video_meter);
        tracing::debug!(target: "playlink::webrtc", attempt = events.attempt(), "peer connection created");

        Ok(Arc::new(NativePeer { pc, video_meter }))
    }
}

fn register_handlers(
    pc: &Arc<RTCPeerConnection>,
    events: &PeerEventSink,
    video_meter: &Arc<FrameRateMeter>,
) {
    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            tracing::debug!(target: "playlink::webrtc", ?state, "peer connection state changed");
            if let Some(state) = map_connection_state(state) {
                sink.emit(PeerEvent::ConnectionState(state));
            }
        })
    }));

    let sink = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            tracing::debug!(target: "playlink::webrtc", ?state, "ice connection state changed");
            if let Some(state) = map_ice_state(state) {
                sink.emit(PeerEvent::IceConnectionState(state));
            }
        })
    }));

    let sink = events.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        let sink = sink.clone();
        Box::pin(async move {
            tracing::trace!(target: "playlink::webrtc", ?state, "ice gathering state changed");
            let mapped = match state {
                RTCIceGathererState::New => Some(IceGatheringState::New),
                RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
                RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
                _ => None,
            };
            if let Some(state) = mapped {
                sink.emit(PeerEvent::IceGatheringState(state));
            }
        })
    }));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(err) => {
                    tracing::warn!(target: "playlink::webrtc", error = %err, "failed to serialise local candidate")
                }
            }
        })
    }));

    let sink = events.clone();
    let meter = video_meter.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = sink.clone();
            let meter = meter.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    other => {
                        tracing::debug!(target: "playlink::webrtc", ?other, "ignoring track of unknown kind");
                        return;
                    }
                };
                tracing::debug!(target: "playlink::webrtc", kind = kind.as_str(), id = %track.id(), "remote track");
                let meter = (kind == TrackKind::Video).then_some(meter);
                sink.emit(PeerEvent::Track(Arc::new(NativeTrack {
                    kind,
                    track,
                    receiver,
                    meter,
                    live: AtomicBool::new(true),
                    playout_delay_us: AtomicU64::new(u64::MAX),
                })));
            })
        },
    ));

    let sink = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let sink = sink.clone();
        Box::pin(async move {
            let label = dc.label().to_string();
            tracing::debug!(target: "playlink::webrtc", %label, "remote data channel");

            let open_sink = sink.clone();
            let open_label = label.clone();
            dc.on_open(Box::new(move || {
                Box::pin(async move {
                    open_sink.emit(PeerEvent::DataChannelOpen { label: open_label });
                })
            }));

            let close_sink = sink.clone();
            let close_label = label.clone();
            dc.on_close(Box::new(move || {
                let sink = close_sink.clone();
                let label = close_label.clone();
                Box::pin(async move {
                    sink.emit(PeerEvent::DataChannelClosed { label });
                })
            }));

            let message_sink = sink.clone();
            let message_label = label.clone();
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let sink = message_sink.clone();
                let label = message_label.clone();
                Box::pin(async move {
                    sink.emit(PeerEvent::DataChannelMessage {
                        label,
                        len: msg.data.len(),
                    });
                })
            }));

            sink.emit(PeerEvent::DataChannel(Arc::new(NativeDataChannel { dc })));
        })
    }));
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    Some(match state {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => return None,
    })
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

struct NativePeer {
    pc: Arc<RTCPeerConnection>,
    video_meter: Arc<FrameRateMeter>,
}

#[async_trait]
impl PeerHandle for NativePeer {
    async fn set_remote_description(
        &self,
        offer: SessionDescription,
    ) -> Result<(), TransportError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(TransportError::Negotiation(format!(
                "expected an offer, got {:?}",
                offer.sdp_type
            )));
        }
        let desc = RTCSessionDescription::offer(offer.sdp).map_err(to_negotiation_error)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(to_negotiation_error)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_negotiation_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        answer: SessionDescription,
    ) -> Result<(), TransportError> {
        let desc = RTCSessionDescription::answer(answer.sdp).map_err(to_negotiation_error)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(to_negotiation_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(to_negotiation_error)
    }

    async fn inbound_video_fps(&self) -> Option<f64> {
        let stats = self.pc.get_stats().await;
        let receiving_video = stats.reports.values().any(|report| {
            matches!(report, StatsReportType::InboundRTP(rtp) if rtp.kind == "video" && rtp.packets_received > 0)
        });
        if !receiving_video {
            return None;
        }
        self.video_meter.fps()
    }

    fn transport_connected(&self) -> bool {
        matches!(
            self.pc.ice_connection_state(),
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
        )
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(target: "playlink::webrtc", error = %err, "peer connection close failed");
        }
    }
}

struct NativeTrack {
    kind: TrackKind,
    track: Arc<TrackRemote>,
    receiver: Arc<RTCRtpReceiver>,
    meter: Option<Arc<FrameRateMeter>>,
    live: AtomicBool,
    /// Playout target for whatever jitter buffer consumes this track.
    /// `u64::MAX` means no hint has been set.
    playout_delay_us: AtomicU64,
}

#[async_trait]
impl MediaTrack for NativeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn id(&self) -> String {
        self.track.id()
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn set_playout_delay(&self, delay: Duration) {
        // u64::MAX is the unset sentinel.
        let us = u64::try_from(delay.as_micros()).map_or(u64::MAX - 1, |us| us.min(u64::MAX - 1));
        self.playout_delay_us.store(us, Ordering::Relaxed);
    }

    fn playout_delay(&self) -> Option<Duration> {
        match self.playout_delay_us.load(Ordering::Relaxed) {
            u64::MAX => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    async fn read_packet(&self) -> Result<MediaPacket, TransportError> {
        match self.track.read_rtp().await {
            Ok((packet, _)) => {
                if packet.header.marker {
                    if let Some(meter) = &self.meter {
                        meter.record_frame();
                    }
                }
                Ok(MediaPacket {
                    sequence_number: packet.header.sequence_number,
                    timestamp: packet.header.timestamp,
                    marker: packet.header.marker,
                    payload: packet.payload,
                })
            }
            Err(err) => {
                self.live.store(false, Ordering::SeqCst);
                Err(TransportError::Io(std::io::Error::other(err.to_string())))
            }
        }
    }

    async fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        if let Err(err) = self.receiver.stop().await {
            tracing::debug!(target: "playlink::webrtc", error = %err, "receiver stop failed");
        }
    }
}

struct NativeDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for NativeDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.dc
            .send(&payload)
            .await
            .map(|_| ())
            .map_err(|err| TransportError::Io(std::io::Error::other(err.to_string())))
    }

    async fn close(&self) {
        if let Err(err) = self.dc.close().await {
            tracing::debug!(target: "playlink::webrtc", error = %err, "data channel close failed");
        }
    }
}

/// Counts completed video frames (RTP marker bits) as the consumer reads them.
#[derive(Debug, Default)]
struct FrameRateMeter {
    window: Mutex<Option<(Instant, u64)>>,
}

impl FrameRateMeter {
    fn record_frame(&self) {
        self.record_frame_at(Instant::now());
    }

    fn record_frame_at(&self, now: Instant) {
        let mut window = self.window.lock();
        match window.as_mut() {
            Some((_, frames)) => *frames += 1,
            None => *window = Some((now, 0)),
        }
    }

    fn fps(&self) -> Option<f64> {
        self.fps_at(Instant::now())
    }

    fn fps_at(&self, now: Instant) -> Option<f64> {
        let (start, frames) = (*self.window.lock())?;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < FPS_WINDOW || frames == 0 {
            return None;
        }
        Some(frames as f64 / elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn meter_waits_for_a_full_window() {
        let meter = FrameRateMeter::default();
        let start = Instant::now();
        assert_eq!(meter.fps_at(start), None);

        meter.record_frame_at(start);
        for i in 1..=30 {
            meter.record_frame_at(start + Duration::from_millis(i * 33));
        }
        assert_eq!(meter.fps_at(start + Duration::from_millis(500)), None);
        let fps = meter.fps_at(start + Duration::from_secs(1)).unwrap();
        assert!((fps - 30.0).abs() < f64::EPSILON);
    }

    #[test_timeout::timeout]
    fn state_mapping_covers_terminal_states() {
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Failed),
            Some(PeerConnectionState::Failed)
        );
        assert_eq!(
            map_ice_state(RTCIceConnectionState::Failed),
            Some(IceConnectionState::Failed)
        );
        assert_eq!(map_connection_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test_timeout::tokio_timeout_test(secs = 20)]
    async fn native_peer_rejects_non_offer_descriptions() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let peer = match NativeConnector
            .connect(&[], PeerEventSink::new(1, tx))
            .await
        {
            Ok(peer) => peer,
            Err(err) => {
                tracing::trace!(target: "playlink::webrtc", error = %err, "skipping native peer test");
                return;
            }
        };
        let err = peer
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Negotiation(_)));
        assert!(!peer.transport_connected());
        peer.close().await;
    }
}
