use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::task::TaskGuard;
use crate::transport::webrtc::PeerHandle;

const MAX_REPORTED_FPS: u32 = 240;

/// Polls the peer's inbound video statistics every `period` until a frame
/// rate is reported, publishes it once and stops. Until then the watch keeps
/// whatever value it already holds.
pub fn spawn_probe(
    peer: Arc<dyn PeerHandle>,
    period: Duration,
    publish: Arc<watch::Sender<u32>>,
) -> TaskGuard {
    TaskGuard::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(fps) = peer.inbound_video_fps().await else {
                continue;
            };
            let fps = normalize(fps);
            let previous = publish.send_replace(fps);
            tracing::info!(target: "playlink::session", fps, previous, "inbound video frame rate");
            break;
        }
    })
}

fn normalize(fps: f64) -> u32 {
    if !fps.is_finite() {
        return 1;
    }
    (fps.round() as u32).clamp(1, MAX_REPORTED_FPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;
    use crate::transport::webrtc::{PeerConnector, PeerEventSink};
    use tokio::sync::mpsc;

    #[test_timeout::timeout]
    fn reported_rates_are_rounded_and_bounded() {
        assert_eq!(normalize(59.94), 60);
        assert_eq!(normalize(0.2), 1);
        assert_eq!(normalize(1000.0), 240);
        assert_eq!(normalize(f64::NAN), 1);
    }

    #[test_timeout::tokio_timeout_test(secs = 10, paused)]
    async fn default_holds_until_stats_arrive_then_polling_stops() {
        let connector = MockConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = connector
            .connect(&[], PeerEventSink::new(1, tx))
            .await
            .unwrap();
        let mock = connector.wait_for_peer(1).await;

        let (publish, watch_rx) = watch::channel(60);
        let guard = spawn_probe(peer, Duration::from_millis(250), Arc::new(publish));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*watch_rx.borrow(), 60);
        assert!(mock.fps_polls() >= 2);

        mock.set_fps(Some(29.97));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*watch_rx.borrow(), 30);
        assert!(guard.is_finished());

        let polls = mock.fps_polls();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.fps_polls(), polls);
    }
}
