use bytes::Bytes;
use playlink_proto::{Envelope, InputEvent, LatencyTrace, encode_envelope};
use tokio::sync::mpsc;

use crate::session::DataChannelSlot;
use crate::task::TaskGuard;

/// Queues input envelopes for the data channel in submission order.
///
/// Sending never fails from the caller's point of view: when the current
/// connection has no open data channel the frame is dropped and logged.
#[derive(Clone)]
pub struct InputSender {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl InputSender {
    /// Start the pump that drains queued frames into whichever data channel
    /// `slot` holds at send time.
    pub fn spawn(slot: DataChannelSlot) -> (Self, TaskGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = TaskGuard::spawn(pump(rx, slot));
        (Self { tx }, pump)
    }

    pub fn send(&self, event: InputEvent, latency: LatencyTrace) {
        let frame = Bytes::from(encode_envelope(&Envelope::input(event, latency)));
        if self.tx.send(frame).is_err() {
            tracing::debug!(target: "playlink::input", event = event.name(), "input pump stopped; event dropped");
        }
    }
}

async fn pump(mut rx: mpsc::UnboundedReceiver<Bytes>, slot: DataChannelSlot) {
    while let Some(frame) = rx.recv().await {
        let Some(channel) = slot.current().filter(|channel| channel.is_open()) else {
            tracing::debug!(target: "playlink::input", len = frame.len(), "no open data channel; input dropped");
            continue;
        };
        if let Err(err) = channel.send(frame).await {
            tracing::debug!(target: "playlink::input", error = %err, "input send failed; dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockDataChannel;
    use playlink_proto::{Payload, decode_envelope};
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn frames_reach_the_open_channel_in_order() {
        let slot = DataChannelSlot::default();
        let channel = MockDataChannel::new("input");
        slot.set(channel.clone());
        let (sender, _pump) = InputSender::spawn(slot);

        for key in [30, 31, 32] {
            sender.send(InputEvent::KeyDown { key }, LatencyTrace::start("input-keyboard"));
        }
        settle().await;

        let keys: Vec<_> = channel
            .sent()
            .iter()
            .map(|frame| match decode_envelope(frame).unwrap().unwrap().payload {
                Payload::Input(InputEvent::KeyDown { key }) => key,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec![30, 31, 32]);
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn missing_or_closed_channel_drops_silently() {
        let slot = DataChannelSlot::default();
        let (sender, _pump) = InputSender::spawn(slot.clone());
        sender.send(InputEvent::KeyDown { key: 1 }, LatencyTrace::start("input-keyboard"));
        settle().await;

        let channel = MockDataChannel::new("input");
        channel.set_open(false);
        slot.set(channel.clone());
        sender.send(InputEvent::KeyUp { key: 1 }, LatencyTrace::start("input-keyboard"));
        settle().await;
        assert!(channel.sent().is_empty());

        channel.set_open(true);
        sender.send(InputEvent::KeyUp { key: 2 }, LatencyTrace::start("input-keyboard"));
        settle().await;
        assert_eq!(channel.sent().len(), 1);
    }
}
