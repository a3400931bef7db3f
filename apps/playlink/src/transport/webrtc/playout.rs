use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};

use super::engine::{MediaTrack, PeerHandle};
use crate::task::TaskGuard;

/// Keeps the receiver's playout delay pinned at zero while `track` is live and
/// the peer's transport stays connected. The engine may raise the delay again
/// on its own, so the hint is re-applied every `period`.
pub fn spawn_low_latency_playout(
    peer: Arc<dyn PeerHandle>,
    track: Arc<dyn MediaTrack>,
    period: Duration,
) -> TaskGuard {
    TaskGuard::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let kind = track.kind();
        loop {
            ticker.tick().await;
            if !track.is_live() || !peer.transport_connected() {
                break;
            }
            track.set_playout_delay(Duration::ZERO);
        }
        tracing::debug!(
            target: "playlink::webrtc",
            kind = kind.as_str(),
            "low-latency playout hint stopped"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockConnector, MockTrack};
    use crate::transport::webrtc::engine::{PeerConnector, PeerEventSink, TrackKind};
    use tokio::sync::mpsc;

    async fn mock_peer() -> (Arc<MockConnector>, Arc<dyn PeerHandle>) {
        let connector = MockConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = connector
            .connect(&[], PeerEventSink::new(1, tx))
            .await
            .unwrap();
        (connector, peer)
    }

    #[test_timeout::tokio_timeout_test(secs = 10, paused)]
    async fn hint_repeats_until_the_track_ends() {
        let (connector, peer) = mock_peer().await;
        let track = MockTrack::new(TrackKind::Video);
        let guard = spawn_low_latency_playout(peer, track.clone(), Duration::from_millis(15));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let applied = track.playout_updates();
        assert!(applied >= 5, "expected repeated hints, saw {applied}");
        assert_eq!(track.playout_delay(), Some(Duration::ZERO));

        track.end();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.is_finished());
        assert!(track.playout_updates() <= applied + 1);
        drop(connector);
    }

    #[test_timeout::tokio_timeout_test(secs = 10, paused)]
    async fn hint_stops_when_transport_drops() {
        let (connector, peer) = mock_peer().await;
        let track = MockTrack::new(TrackKind::Audio);
        let guard = spawn_low_latency_playout(peer, track.clone(), Duration::from_millis(15));

        tokio::time::sleep(Duration::from_millis(40)).await;
        connector.wait_for_peer(1).await.set_transport_connected(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let settled = track.playout_updates();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(track.playout_updates(), settled);
        assert!(guard.is_finished());
    }
}
