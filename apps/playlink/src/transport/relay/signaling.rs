use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use playlink_proto::{
    AnswerBody, IceCandidate, LatencyTrace, SessionDescription, SignalingMessage,
    decode_signaling, encode_signaling,
};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::dial::{DialedSubstream, RelayDialer, Substream};
use super::frame::framed;
use crate::config::{RelayAddress, RoomName};
use crate::task::TaskGuard;
use crate::transport::TransportError;

const INBOUND_CAPACITY: usize = 64;

type FramedSubstream = Framed<Box<dyn Substream>, LengthDelimitedCodec>;

/// Cloneable write half of a [`SignalingChannel`]. Each call writes exactly
/// one frame; concurrent writers are serialised.
#[derive(Clone)]
pub struct SignalingWriter {
    sink: Arc<AsyncMutex<SplitSink<FramedSubstream, Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl SignalingWriter {
    pub async fn write_message(&self, message: &SignalingMessage) -> Result<(), TransportError> {
        self.write_traced(message, None).await
    }

    pub async fn write_traced(
        &self,
        message: &SignalingMessage,
        latency: Option<&LatencyTrace>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let payload = encode_signaling(message, latency)?;
        let frame_len = payload.len();
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(Bytes::from(payload)).await {
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::Io(err));
        }
        tracing::trace!(
            target: "playlink::signaling",
            kind = message.kind(),
            frame_len,
            "signaling frame written"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One long-lived signaling substream to the relay.
///
/// A single reader task decodes frames and queues them in arrival order;
/// frames that fail to decode are dropped without closing the channel. The
/// reader and the relay connection are torn down when the channel is dropped.
pub struct SignalingChannel {
    writer: SignalingWriter,
    inbound: mpsc::Receiver<SignalingMessage>,
    _reader: TaskGuard,
    _driver: Option<TaskGuard>,
}

impl SignalingChannel {
    /// Dial the relay, open the substream and announce ourselves for `room`.
    pub async fn open(
        dialer: &dyn RelayDialer,
        relay: &RelayAddress,
        protocol: &str,
        room: &RoomName,
    ) -> Result<Self, TransportError> {
        let substream = dialer.dial(relay, protocol).await?;
        Self::join(substream, room).await
    }

    /// Wrap an already opened substream and send the `join` message.
    pub async fn join(substream: DialedSubstream, room: &RoomName) -> Result<Self, TransportError> {
        let (stream, driver) = substream.into_parts();
        let (sink, source) = framed(stream).split();
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = TaskGuard::spawn(read_frames(source, tx, closed.clone()));

        let writer = SignalingWriter {
            sink: Arc::new(AsyncMutex::new(sink)),
            closed,
        };
        writer
            .write_message(&SignalingMessage::client_join(room.as_str()))
            .await?;
        tracing::debug!(target: "playlink::signaling", %room, "join sent");

        Ok(Self {
            writer,
            inbound,
            _reader: reader,
            _driver: driver,
        })
    }

    pub fn writer(&self) -> SignalingWriter {
        self.writer.clone()
    }

    pub async fn write_message(&self, message: &SignalingMessage) -> Result<(), TransportError> {
        self.writer.write_message(message).await
    }

    /// Next inbound message; `None` once the substream has closed.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.inbound.recv().await
    }
}

async fn read_frames(
    mut source: SplitStream<FramedSubstream>,
    tx: mpsc::Sender<SignalingMessage>,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(target: "playlink::signaling", error = %err, "signaling read failed");
                break;
            }
        };
        match decode_signaling(&frame) {
            Ok(Some(message)) => {
                tracing::trace!(
                    target: "playlink::signaling",
                    kind = message.kind(),
                    frame_len = frame.len(),
                    "signaling frame received"
                );
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(target: "playlink::signaling", "ignoring signaling frame of unknown kind")
            }
            Err(err) => tracing::warn!(
                target: "playlink::signaling",
                error = %err,
                frame_len = frame.len(),
                "discarding undecodable signaling frame"
            ),
        }
    }
    closed.store(true, Ordering::SeqCst);
    tracing::debug!(target: "playlink::signaling", "signaling substream closed");
}

/// Receives signaling messages one kind per method. Unhandled kinds fall
/// through to the defaults, which only log.
#[async_trait]
pub trait SignalingHandler: Send {
    async fn on_offer(&mut self, offer: SessionDescription) -> Result<(), TransportError>;

    async fn on_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn on_answer(&mut self, answer: AnswerBody) -> Result<(), TransportError> {
        tracing::debug!(target: "playlink::signaling", ?answer, "unhandled answer");
        Ok(())
    }

    async fn on_request_stream_offline(&mut self, data: Value) -> Result<(), TransportError> {
        tracing::debug!(target: "playlink::signaling", %data, "unhandled request-stream-offline");
        Ok(())
    }

    async fn on_join(&mut self, room: String) -> Result<(), TransportError> {
        tracing::debug!(target: "playlink::signaling", %room, "ignoring join from relay");
        Ok(())
    }
}

/// Route one message to its handler method.
pub async fn dispatch<H>(handler: &mut H, message: SignalingMessage) -> Result<(), TransportError>
where
    H: SignalingHandler + ?Sized,
{
    match message {
        SignalingMessage::Offer(offer) => handler.on_offer(offer).await,
        SignalingMessage::IceCandidate(candidate) => handler.on_ice_candidate(candidate).await,
        SignalingMessage::Answer(answer) => handler.on_answer(answer).await,
        SignalingMessage::RequestStreamOffline { data } => {
            handler.on_request_stream_offline(data).await
        }
        SignalingMessage::Join { room, .. } => handler.on_join(room).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playlink_proto::AnswerType;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    async fn read_frame(peer: &mut DuplexStream) -> Value {
        let len = peer.read_u32().await.unwrap() as usize;
        let mut buf = vec![0; len];
        peer.read_exact(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    async fn write_frame(peer: &mut DuplexStream, payload: &[u8]) {
        peer.write_u32(payload.len() as u32).await.unwrap();
        peer.write_all(payload).await.unwrap();
    }

    async fn open_pair() -> (SignalingChannel, DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        let channel = SignalingChannel::join(
            DialedSubstream::new(Box::new(local)),
            &"abc123".parse().unwrap(),
        )
        .await
        .expect("join");
        (channel, remote)
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn join_is_the_first_frame() {
        let (_channel, mut remote) = open_pair().await;
        let join = read_frame(&mut remote).await;
        assert_eq!(join["payload_type"], "join");
        assert_eq!(join["joiner_type"], 1);
        assert_eq!(join["room"], "abc123");
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn frames_arrive_in_order_and_bad_frames_are_skipped() {
        let (mut channel, mut remote) = open_pair().await;
        let _ = read_frame(&mut remote).await;

        write_frame(&mut remote, br#"{"payload_type":"answer","answer_type":2}"#).await;
        write_frame(&mut remote, b"{garbage").await;
        write_frame(&mut remote, br#"{"payload_type":"metrics"}"#).await;
        write_frame(
            &mut remote,
            br#"{"payload_type":"offer","sdp":{"type":"offer","sdp":"v=0"}}"#,
        )
        .await;

        assert_eq!(
            channel.recv().await,
            Some(SignalingMessage::Answer(AnswerBody::Status(AnswerType::Ok)))
        );
        assert_eq!(
            channel.recv().await,
            Some(SignalingMessage::Offer(SessionDescription::offer("v=0")))
        );
        assert!(!channel.writer().is_closed());
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn remote_close_ends_the_inbound_queue() {
        let (mut channel, remote) = open_pair().await;
        drop(remote);
        assert_eq!(channel.recv().await, None);
        assert!(channel.writer().is_closed());
        let err = channel
            .write_message(&SignalingMessage::RequestStreamOffline { data: json!(null) })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed));
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
    }

    #[async_trait]
    impl SignalingHandler for Recorder {
        async fn on_offer(&mut self, _offer: SessionDescription) -> Result<(), TransportError> {
            self.seen.push("offer");
            Ok(())
        }

        async fn on_ice_candidate(&mut self, _c: IceCandidate) -> Result<(), TransportError> {
            self.seen.push("ice-candidate");
            Ok(())
        }
    }

    #[test_timeout::tokio_timeout_test(secs = 10)]
    async fn dispatch_routes_each_kind_once() {
        let mut recorder = Recorder::default();
        for message in [
            SignalingMessage::IceCandidate(IceCandidate::default()),
            SignalingMessage::Answer(AnswerBody::Status(AnswerType::InUse)),
            SignalingMessage::Offer(SessionDescription::offer("v=0")),
        ] {
            dispatch(&mut recorder, message).await.unwrap();
        }
        assert_eq!(recorder.seen, vec!["ice-candidate", "offer"]);
    }
}
