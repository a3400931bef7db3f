use std::sync::Arc;

use playlink_proto::{AnswerBody, IceCandidate, SessionDescription, SignalingMessage};

use super::engine::{
    DataChannel, IceConnectionState, MediaTrack, PeerConnectionState, PeerConnector, PeerEvent,
    PeerEventSink, PeerHandle, TrackKind,
};
use super::ice::PendingIceBuffer;
use super::sdp::force_opus_stereo;
use crate::session::DataChannelSlot;
use crate::transport::TransportError;
use crate::transport::relay::SignalingWriter;

/// Coarse outcome of one negotiation, derived from the engine's sub-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStatus {
    Pending,
    Ready,
    Failed,
}

/// Answer side of one offer/answer exchange with the host.
///
/// The peer connection is created lazily on the first offer. Remote ICE
/// candidates are held until the remote description is in place. Local
/// candidates go back out over the signaling writer for as long as it is open.
pub struct SessionNegotiator {
    connector: Arc<dyn PeerConnector>,
    ice_servers: Vec<String>,
    sink: PeerEventSink,
    writer: SignalingWriter,
    peer: Option<Arc<dyn PeerHandle>>,
    pending_ice: PendingIceBuffer,
    audio: Option<Arc<dyn MediaTrack>>,
    video: Option<Arc<dyn MediaTrack>>,
    data_channel: Option<Arc<dyn DataChannel>>,
    slot: DataChannelSlot,
    connection: PeerConnectionState,
    ice: IceConnectionState,
}

impl SessionNegotiator {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        ice_servers: Vec<String>,
        sink: PeerEventSink,
        writer: SignalingWriter,
        slot: DataChannelSlot,
    ) -> Self {
        Self {
            connector,
            ice_servers,
            sink,
            writer,
            peer: None,
            pending_ice: PendingIceBuffer::new(),
            audio: None,
            video: None,
            data_channel: None,
            slot,
            connection: PeerConnectionState::New,
            ice: IceConnectionState::New,
        }
    }

    pub fn peer(&self) -> Option<Arc<dyn PeerHandle>> {
        self.peer.clone()
    }

    async fn ensure_peer(&mut self) -> Result<Arc<dyn PeerHandle>, TransportError> {
        if let Some(peer) = &self.peer {
            return Ok(peer.clone());
        }
        let peer = self
            .connector
            .connect(&self.ice_servers, self.sink.clone())
            .await?;
        tracing::debug!(
            target: "playlink::webrtc",
            attempt = self.sink.attempt(),
            "peer connection created"
        );
        self.peer = Some(peer.clone());
        Ok(peer)
    }

    /// Apply the host's offer and send back our (stereo-adjusted) answer.
    pub async fn handle_offer(&mut self, offer: SessionDescription) -> Result<(), TransportError> {
        let peer = self.ensure_peer().await?;
        peer.set_remote_description(offer).await?;

        for candidate in self.pending_ice.drain() {
            if let Err(err) = peer.add_ice_candidate(candidate).await {
                tracing::warn!(target: "playlink::webrtc", error = %err, "buffered ice candidate rejected");
            }
        }

        let answer = peer.create_answer().await?;
        let answer = SessionDescription::answer(force_opus_stereo(&answer.sdp));
        peer.set_local_description(answer.clone()).await?;
        self.writer
            .write_message(&SignalingMessage::Answer(AnswerBody::Sdp(answer)))
            .await?;
        tracing::info!(target: "playlink::webrtc", attempt = self.sink.attempt(), "answer sent");
        Ok(())
    }

    pub async fn handle_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), TransportError> {
        let Some(candidate) = self.pending_ice.offer(candidate) else {
            tracing::trace!(
                target: "playlink::webrtc",
                pending = self.pending_ice.len(),
                "ice candidate buffered until remote description"
            );
            return Ok(());
        };
        let Some(peer) = self.peer.clone() else {
            return Ok(());
        };
        if let Err(err) = peer.add_ice_candidate(candidate).await {
            tracing::warn!(target: "playlink::webrtc", error = %err, "remote ice candidate rejected");
        }
        Ok(())
    }

    /// Fold one engine report into the negotiation.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::ConnectionState(state) => {
                tracing::debug!(target: "playlink::webrtc", ?state, "peer connection state");
                self.connection = state;
            }
            PeerEvent::IceConnectionState(state) => {
                tracing::debug!(target: "playlink::webrtc", ?state, "ice connection state");
                self.ice = state;
            }
            PeerEvent::IceGatheringState(state) => {
                tracing::trace!(target: "playlink::webrtc", ?state, "ice gathering state");
            }
            PeerEvent::LocalCandidate(candidate) => {
                if self.writer.is_closed() {
                    tracing::debug!(target: "playlink::webrtc", "signaling closed; local candidate dropped");
                    return;
                }
                let message = SignalingMessage::IceCandidate(candidate);
                if let Err(err) = self.writer.write_message(&message).await {
                    tracing::debug!(target: "playlink::webrtc", error = %err, "local candidate not sent");
                }
            }
            PeerEvent::Track(track) => {
                tracing::info!(
                    target: "playlink::webrtc",
                    kind = track.kind().as_str(),
                    id = %track.id(),
                    "remote track received"
                );
                match track.kind() {
                    TrackKind::Audio => self.audio = Some(track),
                    TrackKind::Video => self.video = Some(track),
                }
            }
            PeerEvent::DataChannel(channel) => {
                tracing::info!(target: "playlink::webrtc", label = %channel.label(), "data channel announced");
                self.slot.set(channel.clone());
                self.data_channel = Some(channel);
            }
            PeerEvent::DataChannelOpen { label } => {
                tracing::debug!(target: "playlink::webrtc", %label, "data channel open");
            }
            PeerEvent::DataChannelClosed { label } => {
                tracing::debug!(target: "playlink::webrtc", %label, "data channel closed");
            }
            PeerEvent::DataChannelMessage { label, len } => {
                tracing::trace!(target: "playlink::webrtc", %label, len, "data channel message ignored");
            }
        }
    }

    pub fn status(&self) -> NegotiationStatus {
        let failed = matches!(
            self.connection,
            PeerConnectionState::Failed | PeerConnectionState::Closed
        ) || self.ice == IceConnectionState::Failed;
        if failed {
            NegotiationStatus::Failed
        } else if self.connection == PeerConnectionState::Connected
            && self.audio.is_some()
            && self.video.is_some()
        {
            NegotiationStatus::Ready
        } else {
            NegotiationStatus::Pending
        }
    }

    /// Both received tracks, once both have arrived.
    pub fn media_tracks(&self) -> Option<(Arc<dyn MediaTrack>, Arc<dyn MediaTrack>)> {
        Some((self.audio.clone()?, self.video.clone()?))
    }

    /// Stop the tracks, close the data channel and the peer. Safe to call
    /// more than once.
    pub async fn teardown(&mut self) {
        self.slot.clear();
        for track in [self.audio.take(), self.video.take()].into_iter().flatten() {
            track.stop().await;
        }
        if let Some(channel) = self.data_channel.take() {
            channel.close().await;
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
            tracing::debug!(target: "playlink::webrtc", attempt = self.sink.attempt(), "peer connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{
        MockConnector, MockDataChannel, MockDialer, MockRelay, MockTrack, PeerCall,
    };
    use crate::transport::relay::SignalingChannel;
    use tokio::sync::mpsc;

    struct Harness {
        connector: Arc<MockConnector>,
        negotiator: SessionNegotiator,
        relay: MockRelay,
        slot: DataChannelSlot,
        _channel: SignalingChannel,
        _events: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
    }

    async fn harness() -> Harness {
        let (dialer, mut relays) = MockDialer::new();
        let relay_addr = crate::transport::mock::relay_address().unwrap();
        let channel = SignalingChannel::open(
            &*dialer,
            &relay_addr,
            "/playlink-relay/stream-request/1.0.0",
            &"abc123".parse().unwrap(),
        )
        .await
        .unwrap();
        let mut relay = relays.recv().await.unwrap();
        let _join = relay.recv_json().await.unwrap();

        let connector = MockConnector::new();
        let (tx, events) = mpsc::unbounded_channel();
        let slot = DataChannelSlot::default();
        let negotiator = SessionNegotiator::new(
            connector.clone(),
            vec!["stun:stun.l.google.com:19302".into()],
            PeerEventSink::new(1, tx),
            channel.writer(),
            slot.clone(),
        );
        Harness {
            connector,
            negotiator,
            relay,
            slot,
            _channel: channel,
            _events: events,
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n}"),
            ..IceCandidate::default()
        }
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn offer_is_answered_with_stereo_opus() {
        let mut h = harness().await;
        h.negotiator
            .handle_offer(SessionDescription::offer("v=0 offer"))
            .await
            .unwrap();

        let answer = h.relay.recv_json().await.unwrap();
        assert_eq!(answer["payload_type"], "answer");
        assert_eq!(answer["sdp"]["type"], "answer");
        let sdp = answer["sdp"]["sdp"].as_str().unwrap();
        assert!(sdp.contains("minptime=10;useinbandfec=1;stereo=1;sprop-stereo=1;"));

        let peer = h.connector.wait_for_peer(1).await;
        assert_eq!(peer.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        match &peer.calls()[2] {
            PeerCall::SetLocal(local) => assert!(local.contains("sprop-stereo=1")),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn early_candidates_apply_after_remote_description() {
        let mut h = harness().await;
        h.negotiator.handle_remote_candidate(candidate(1)).await.unwrap();
        h.negotiator.handle_remote_candidate(candidate(2)).await.unwrap();
        assert_eq!(h.connector.peer_count(), 0);

        h.negotiator
            .handle_offer(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        h.negotiator.handle_remote_candidate(candidate(3)).await.unwrap();

        let calls = h.connector.wait_for_peer(1).await.calls();
        assert_eq!(
            calls,
            vec![
                PeerCall::SetRemote("v=0".into()),
                PeerCall::AddCandidate("candidate:1".into()),
                PeerCall::AddCandidate("candidate:2".into()),
                PeerCall::CreateAnswer,
                PeerCall::SetLocal(force_opus_stereo(crate::transport::mock::MOCK_ANSWER_SDP)),
                PeerCall::AddCandidate("candidate:3".into()),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn status_needs_both_tracks_and_connected() {
        let mut h = harness().await;
        assert_eq!(h.negotiator.status(), NegotiationStatus::Pending);

        h.negotiator
            .handle_peer_event(PeerEvent::Track(MockTrack::new(TrackKind::Audio)))
            .await;
        h.negotiator
            .handle_peer_event(PeerEvent::ConnectionState(PeerConnectionState::Connected))
            .await;
        assert_eq!(h.negotiator.status(), NegotiationStatus::Pending);

        h.negotiator
            .handle_peer_event(PeerEvent::Track(MockTrack::new(TrackKind::Video)))
            .await;
        assert_eq!(h.negotiator.status(), NegotiationStatus::Ready);

        h.negotiator
            .handle_peer_event(PeerEvent::IceConnectionState(IceConnectionState::Failed))
            .await;
        assert_eq!(h.negotiator.status(), NegotiationStatus::Failed);
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn local_candidates_are_forwarded() {
        let mut h = harness().await;
        h.negotiator
            .handle_peer_event(PeerEvent::LocalCandidate(IceCandidate {
                candidate: "candidate:local".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
                ..IceCandidate::default()
            }))
            .await;
        let sent = h.relay.recv_json().await.unwrap();
        assert_eq!(sent["payload_type"], "ice-candidate");
        assert_eq!(sent["candidate"]["candidate"], "candidate:local");
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn teardown_releases_everything() {
        let mut h = harness().await;
        h.negotiator
            .handle_offer(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        let audio = MockTrack::new(TrackKind::Audio);
        let channel = MockDataChannel::new("input");
        h.negotiator.handle_peer_event(PeerEvent::Track(audio.clone())).await;
        h.negotiator
            .handle_peer_event(PeerEvent::DataChannel(channel.clone()))
            .await;
        assert!(h.slot.current().is_some());

        h.negotiator.teardown().await;
        h.negotiator.teardown().await;

        assert!(h.slot.current().is_none());
        assert!(!audio.is_live());
        assert!(!channel.is_open());
        let peer = h.connector.wait_for_peer(1).await;
        assert!(peer.is_closed());
        assert_eq!(h.connector.live_peers(), 0);
    }
}
