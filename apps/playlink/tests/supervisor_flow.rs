use std::sync::Arc;
use std::time::Duration;

use playlink_client_core::session::supervisor::SupervisorError;
use playlink_client_core::transport::mock::{
    DialScript, MockConnector, MockDataChannel, MockDialer, MockPeer, MockRelay, MockTrack,
    PeerCall, relay_address,
};
use playlink_client_core::transport::webrtc::{
    IceConnectionState, PeerConnectionState, PeerEvent, TrackKind,
};
use playlink_client_core::{
    ClientConfig, ConnectionState, ReconnectSupervisor, StreamEvent, SupervisorHandle,
};
use playlink_proto::{AnswerBody, AnswerType, IceCandidate, SessionDescription, SignalingMessage};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const HOST_OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n";

struct Flow {
    handle: SupervisorHandle,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    dialer: Arc<MockDialer>,
    relays: mpsc::UnboundedReceiver<MockRelay>,
    connector: Arc<MockConnector>,
}

fn config(room: &str) -> ClientConfig {
    ClientConfig::new(relay_address().unwrap(), room.parse().unwrap())
}

fn start(config: ClientConfig) -> Flow {
    let (dialer, relays) = MockDialer::new();
    let connector = MockConnector::new();
    let (handle, events) = ReconnectSupervisor::new(config, dialer.clone(), connector.clone())
        .spawn()
        .unwrap();
    Flow {
        handle,
        events,
        dialer,
        relays,
        connector,
    }
}

impl Flow {
    async fn next_relay(&mut self) -> (MockRelay, Value) {
        let mut relay = self.relays.recv().await.expect("dial");
        let join = relay.recv_json().await.expect("join frame");
        (relay, join)
    }

    async fn negotiate(&mut self, relay: &mut MockRelay, peer_number: usize) -> Arc<MockPeer> {
        relay
            .send(&SignalingMessage::Offer(SessionDescription::offer(HOST_OFFER)))
            .await;
        let answer = relay.recv_json().await.expect("answer frame");
        assert_eq!(answer["payload_type"], "answer");
        self.connector.wait_for_peer(peer_number).await
    }

    async fn wait_state(&self, state: ConnectionState) {
        let mut rx = self.handle.subscribe_state();
        rx.wait_for(|current| *current == state).await.unwrap();
    }

    async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(500), self.events.recv()).await;
        assert!(next.is_err(), "unexpected stream event {next:?}");
    }
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn stereo_answer_and_single_connected_notification() {
    let mut flow = start(config("abc123"));
    let (mut relay, join) = flow.next_relay().await;
    assert_eq!(join, json!({"payload_type": "join", "joiner_type": 1, "room": "abc123"}));

    relay
        .send(&SignalingMessage::Offer(SessionDescription::offer(HOST_OFFER)))
        .await;
    let answer = relay.recv_json().await.unwrap();
    assert_eq!(answer["payload_type"], "answer");
    assert_eq!(answer["sdp"]["type"], "answer");
    assert!(
        answer["sdp"]["sdp"]
            .as_str()
            .unwrap()
            .contains("a=fmtp:111 minptime=10;useinbandfec=1;stereo=1;sprop-stereo=1;")
    );
    flow.wait_state(ConnectionState::Negotiating).await;

    let peer = flow.connector.wait_for_peer(1).await;
    assert_eq!(peer.ice_servers, vec!["stun:stun.l.google.com:19302"]);
    peer.connect_media();

    match flow.events.recv().await {
        Some(StreamEvent::Connected(stream)) => {
            assert_eq!(stream.audio.kind(), TrackKind::Audio);
            assert_eq!(stream.video.kind(), TrackKind::Video);
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(flow.handle.state(), ConnectionState::Connected);

    peer.emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
    peer.emit(PeerEvent::IceConnectionState(IceConnectionState::Completed));
    peer.emit(PeerEvent::Track(MockTrack::new(TrackKind::Video)));
    flow.assert_quiet().await;
    assert_eq!(flow.dialer.dial_count(), 1);
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn candidates_before_the_offer_are_applied_after_it() {
    let mut flow = start(config("abc123"));
    let (mut relay, _) = flow.next_relay().await;
    for n in 1..=2 {
        relay
            .send(&SignalingMessage::IceCandidate(IceCandidate {
                candidate: format!("candidate:{n}"),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            }))
            .await;
    }
    let peer = flow.negotiate(&mut relay, 1).await;
    relay
        .send(&SignalingMessage::IceCandidate(IceCandidate {
            candidate: "candidate:3".into(),
            ..IceCandidate::default()
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let calls = peer.calls();
    let position = |call: &PeerCall| calls.iter().position(|c| c == call).unwrap();
    let remote = position(&PeerCall::SetRemote(HOST_OFFER.into()));
    let first = position(&PeerCall::AddCandidate("candidate:1".into()));
    let second = position(&PeerCall::AddCandidate("candidate:2".into()));
    let answer = position(&PeerCall::CreateAnswer);
    let late = position(&PeerCall::AddCandidate("candidate:3".into()));
    assert!(remote < first && first < second && second < answer && answer < late);
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn audio_only_stays_negotiating() {
    let mut flow = start(config("abc123"));
    let (mut relay, _) = flow.next_relay().await;
    let peer = flow.negotiate(&mut relay, 1).await;

    peer.emit(PeerEvent::Track(MockTrack::new(TrackKind::Audio)));
    peer.emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
    flow.assert_quiet().await;
    assert_eq!(flow.handle.state(), ConnectionState::Negotiating);
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn failure_reconnects_with_one_peer_at_a_time() {
    let mut flow = start(config("abc123"));
    let (mut relay, _) = flow.next_relay().await;
    let first = flow.negotiate(&mut relay, 1).await;
    first.connect_media();
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::Connected(_))
    ));

    first.emit(PeerEvent::ConnectionState(PeerConnectionState::Failed));
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::Disconnected)
    ));
    assert!(first.is_closed());

    let (mut relay, join) = flow.next_relay().await;
    assert_eq!(join["room"], "abc123");
    let second = flow.negotiate(&mut relay, 2).await;

    // Reports from the superseded peer must not complete the new attempt.
    first.connect_media();
    flow.assert_quiet().await;
    assert_eq!(flow.handle.state(), ConnectionState::Negotiating);

    second.connect_media();
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::Connected(_))
    ));
    assert_eq!(flow.connector.max_live_peers(), 1);
    assert_eq!(flow.connector.live_peers(), 1);
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn ice_failure_and_signaling_loss_before_connect_stay_silent() {
    let mut flow = start(config("abc123"));
    let (mut relay, _) = flow.next_relay().await;
    let peer = flow.negotiate(&mut relay, 1).await;
    peer.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));
    flow.wait_state(ConnectionState::Reconnecting).await;
    assert!(peer.is_closed());

    let (relay, _) = flow.next_relay().await;
    drop(relay);
    flow.wait_state(ConnectionState::Reconnecting).await;
    let (_relay, _) = flow.next_relay().await;

    assert!(flow.events.try_recv().is_err());
    assert_eq!(flow.dialer.dial_count(), 3);
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn offline_room_is_reported_then_retried() {
    let mut flow = start(config("abc123"));
    let (mut relay, _) = flow.next_relay().await;
    relay
        .send(&SignalingMessage::Answer(AnswerBody::Status(AnswerType::InUse)))
        .await;
    relay
        .send(&SignalingMessage::Answer(AnswerBody::Status(AnswerType::Offline)))
        .await;
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::RoomOffline)
    ));

    let (mut relay, _) = flow.next_relay().await;
    relay
        .send(&SignalingMessage::RequestStreamOffline { data: json!({}) })
        .await;
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::RoomOffline)
    ));
    let _ = flow.next_relay().await;
    assert_eq!(flow.connector.peer_count(), 0);
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn refused_dials_are_retried_after_the_delay() {
    let mut flow = start(config("abc123").with_retry_delay(Duration::from_secs(5)));
    flow.dialer.push(DialScript::Refuse("connection refused".into()));
    flow.dialer.push(DialScript::Refuse("connection refused".into()));

    let started = tokio::time::Instant::now();
    let _ = flow.next_relay().await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(flow.dialer.dial_count(), 3);
    flow.wait_state(ConnectionState::AwaitingOffer).await;
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn frame_rate_and_data_channel_follow_the_connection() {
    let mut flow = start(config("abc123"));
    let frame_rate = flow.handle.frame_rate();
    assert_eq!(*frame_rate.borrow(), 60);

    let (mut relay, _) = flow.next_relay().await;
    let peer = flow.negotiate(&mut relay, 1).await;
    let channel = MockDataChannel::new("input");
    peer.emit(PeerEvent::DataChannel(channel.clone()));
    peer.set_fps(Some(29.97));
    peer.connect_media();
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::Connected(_))
    ));
    assert!(flow.handle.data_channel().current().is_some());

    let mut frame_rate = frame_rate;
    frame_rate.wait_for(|fps| *fps == 30).await.unwrap();

    let slot = flow.handle.data_channel();
    flow.handle.shutdown().await.unwrap();
    assert!(slot.current().is_none());
    assert!(peer.is_closed());
    assert!(matches!(
        flow.events.recv().await,
        Some(StreamEvent::Disconnected)
    ));
}

#[test_timeout::tokio_timeout_test(secs = 20, paused)]
async fn setup_errors_are_fatal() {
    let mut flow = start(config("abc123"));
    flow.connector.fail_setup();
    let (mut relay, _) = flow.next_relay().await;
    relay
        .send(&SignalingMessage::Offer(SessionDescription::offer(HOST_OFFER)))
        .await;

    let mut state = flow.handle.subscribe_state();
    state
        .wait_for(|current| *current == ConnectionState::Failed)
        .await
        .unwrap();
    let result = flow.handle.join().await;
    assert!(matches!(result, Err(SupervisorError::Fatal(_))));
    assert_eq!(flow.dialer.dial_count(), 1);
}

#[test_timeout::tokio_timeout_test(secs = 5)]
async fn invalid_configuration_is_rejected_up_front() {
    let mut bad_protocol = config("abc123");
    bad_protocol.protocol = "stream-request".into();
    let bad_stun = config("abc123").with_stun_url("not a stun url");
    let (dialer, _relays) = MockDialer::new();

    for invalid in [bad_protocol, bad_stun] {
        let result = ReconnectSupervisor::new(invalid, dialer.clone(), MockConnector::new()).spawn();
        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }
    assert_eq!(dialer.dial_count(), 0);
}
