//! Owns the client's connection lifecycle.
//!
//! One supervisor task dials the relay, runs a single negotiation at a time
//! and tears everything down before retrying. Consumers only ever see
//! [`StreamEvent`]s and the published [`ConnectionState`].

use std::sync::Arc;

use async_trait::async_trait;
use playlink_proto::{AnswerBody, AnswerType, IceCandidate, SessionDescription};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::DataChannelSlot;
use super::frame_rate::spawn_probe;
use crate::config::{ClientConfig, ConfigError};
use crate::task::TaskGuard;
use crate::transport::TransportError;
use crate::transport::relay::{RelayDialer, SignalingChannel, SignalingHandler, dispatch};
use crate::transport::webrtc::{
    AttemptId, MediaTrack, NegotiationStatus, PeerConnector, PeerEvent, PeerEventSink,
    SessionNegotiator, spawn_low_latency_playout,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Dialing,
    AwaitingOffer,
    Negotiating,
    Connected,
    Failed,
    Reconnecting,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Open,
    SubstreamJoined,
    AnswerSent,
    MediaReady,
    Degraded,
    RetryElapsed,
    Fatal,
    Shutdown,
}

impl ConnectionState {
    /// The state `trigger` leads to, or `None` when it changes nothing.
    pub fn on(self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, trigger) {
            (Failed, _) => None,
            (_, Trigger::Fatal) => Some(Failed),
            (Idle, Trigger::Shutdown) => None,
            (_, Trigger::Shutdown) => Some(Idle),
            (Idle, Trigger::Open) => Some(Dialing),
            (Dialing, Trigger::SubstreamJoined) => Some(AwaitingOffer),
            (AwaitingOffer, Trigger::AnswerSent) => Some(Negotiating),
            (Negotiating, Trigger::MediaReady) => Some(Connected),
            (Dialing | AwaitingOffer | Negotiating | Connected, Trigger::Degraded) => {
                Some(Reconnecting)
            }
            (Reconnecting, Trigger::RetryElapsed) => Some(Idle),
            _ => None,
        }
    }
}

/// The two received tracks handed to the consumer.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub audio: Arc<dyn MediaTrack>,
    pub video: Arc<dyn MediaTrack>,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected(MediaStream),
    Disconnected,
    RoomOffline,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("unrecoverable transport error: {0}")]
    Fatal(#[source] TransportError),
    #[error("supervisor task panicked: {0}")]
    Panicked(String),
}

pub struct ReconnectSupervisor {
    config: ClientConfig,
    dialer: Arc<dyn RelayDialer>,
    connector: Arc<dyn PeerConnector>,
}

impl ReconnectSupervisor {
    pub fn new(
        config: ClientConfig,
        dialer: Arc<dyn RelayDialer>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            config,
            dialer,
            connector,
        }
    }

    /// Validate the configuration and start the supervisor task. Events for
    /// the consumer arrive on the returned receiver.
    pub fn spawn(
        self,
    ) -> Result<(SupervisorHandle, mpsc::UnboundedReceiver<StreamEvent>), SupervisorError> {
        self.config.validate()?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (frame_rate_tx, frame_rate_rx) = watch::channel(self.config.default_frame_rate);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let slot = DataChannelSlot::default();

        let runner = Runner {
            config: Arc::new(self.config),
            dialer: self.dialer,
            connector: self.connector,
            state: StateCell {
                tx: Arc::new(state_tx),
            },
            events: events_tx,
            frame_rate: Arc::new(frame_rate_tx),
            slot: slot.clone(),
            peer_tx,
            peer_rx,
            shutdown: shutdown_rx,
            attempt: 0,
        };
        let task = tokio::spawn(runner.run());

        let handle = SupervisorHandle {
            state: state_rx,
            frame_rate: frame_rate_rx,
            data_channel: slot,
            shutdown: shutdown_tx,
            task,
        };
        Ok((handle, events_rx))
    }
}

/// Control and observation side of a running supervisor. Dropping the handle
/// stops the supervisor.
pub struct SupervisorHandle {
    state: watch::Receiver<ConnectionState>,
    frame_rate: watch::Receiver<u32>,
    data_channel: DataChannelSlot,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), SupervisorError>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Inbound video frame rate; holds the configured default until the
    /// probe reports.
    pub fn frame_rate(&self) -> watch::Receiver<u32> {
        self.frame_rate.clone()
    }

    pub fn data_channel(&self) -> DataChannelSlot {
        self.data_channel.clone()
    }

    /// Tear down the current connection and wait for the task to exit.
    pub async fn shutdown(self) -> Result<(), SupervisorError> {
        let _ = self.shutdown.send(true);
        self.join().await
    }

    /// Wait for the supervisor to stop on its own, which only happens after a
    /// fatal error.
    pub async fn join(self) -> Result<(), SupervisorError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(SupervisorError::Panicked(err.to_string())),
        }
    }
}

#[derive(Clone)]
struct StateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl StateCell {
    fn apply(&self, trigger: Trigger, attempt: AttemptId) {
        let current = *self.tx.borrow();
        match current.on(trigger) {
            Some(next) => {
                tracing::info!(
                    target: "playlink::session",
                    attempt,
                    from = ?current,
                    to = ?next,
                    ?trigger,
                    "connection state changed"
                );
                self.tx.send_replace(next);
            }
            None => tracing::trace!(
                target: "playlink::session",
                attempt,
                state = ?current,
                ?trigger,
                "trigger ignored"
            ),
        }
    }
}

#[derive(Debug)]
enum Exit {
    Retry(&'static str),
    RoomOffline,
    Fatal(TransportError),
    Shutdown,
}

struct Runner {
    config: Arc<ClientConfig>,
    dialer: Arc<dyn RelayDialer>,
    connector: Arc<dyn PeerConnector>,
    state: StateCell,
    events: mpsc::UnboundedSender<StreamEvent>,
    frame_rate: Arc<watch::Sender<u32>>,
    slot: DataChannelSlot,
    peer_tx: mpsc::UnboundedSender<(AttemptId, PeerEvent)>,
    peer_rx: mpsc::UnboundedReceiver<(AttemptId, PeerEvent)>,
    shutdown: watch::Receiver<bool>,
    attempt: AttemptId,
}

impl Runner {
    async fn run(mut self) -> Result<(), SupervisorError> {
        loop {
            self.attempt += 1;
            let exit = self.run_attempt().await;
            match exit {
                Exit::Shutdown => {
                    self.state.apply(Trigger::Shutdown, self.attempt);
                    return Ok(());
                }
                Exit::Fatal(err) => {
                    tracing::error!(target: "playlink::session", error = %err, "giving up");
                    self.state.apply(Trigger::Fatal, self.attempt);
                    return Err(SupervisorError::Fatal(err));
                }
                Exit::Retry(reason) => {
                    tracing::warn!(
                        target: "playlink::session",
                        attempt = self.attempt,
                        reason,
                        retry_in = ?self.config.retry_delay,
                        "connection lost; retrying"
                    );
                }
                Exit::RoomOffline => {
                    tracing::info!(
                        target: "playlink::session",
                        room = %self.config.room,
                        retry_in = ?self.config.retry_delay,
                        "room offline; retrying"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                _ = shutdown_requested(&mut self.shutdown) => {
                    self.state.apply(Trigger::Shutdown, self.attempt);
                    return Ok(());
                }
            }
            self.state.apply(Trigger::RetryElapsed, self.attempt);
        }
    }

    async fn run_attempt(&mut self) -> Exit {
        let id = self.attempt;
        self.state.apply(Trigger::Open, id);

        let opened = tokio::select! {
            opened = SignalingChannel::open(
                self.dialer.as_ref(),
                &self.config.relay,
                &self.config.protocol,
                &self.config.room,
            ) => opened,
            _ = shutdown_requested(&mut self.shutdown) => return Exit::Shutdown,
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(err) if err.is_fatal() => return Exit::Fatal(err),
            Err(err) => {
                tracing::warn!(target: "playlink::session", attempt = id, error = %err, "relay dial failed");
                self.state.apply(Trigger::Degraded, id);
                return Exit::Retry("dial failed");
            }
        };
        self.state.apply(Trigger::SubstreamJoined, id);

        let negotiator = SessionNegotiator::new(
            self.connector.clone(),
            self.config.ice_servers(),
            PeerEventSink::new(id, self.peer_tx.clone()),
            channel.writer(),
            self.slot.clone(),
        );
        let mut attempt = Attempt {
            id,
            negotiator,
            state: self.state.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            frame_rate: self.frame_rate.clone(),
            connected_notified: false,
            exit: None,
            helpers: Vec::new(),
        };

        let exit = loop {
            if let Some(exit) = attempt.exit.take() {
                break exit;
            }
            tokio::select! {
                message = channel.recv() => match message {
                    Some(message) => {
                        if let Err(err) = dispatch(&mut attempt, message).await {
                            attempt.fail(err);
                        }
                        attempt.evaluate();
                    }
                    None => attempt.exit = Some(Exit::Retry("signaling channel closed")),
                },
                Some((event_attempt, event)) = self.peer_rx.recv() => {
                    if event_attempt != id {
                        tracing::trace!(
                            target: "playlink::session",
                            stale = event_attempt,
                            current = id,
                            "discarding event from superseded attempt"
                        );
                        continue;
                    }
                    attempt.negotiator.handle_peer_event(event).await;
                    attempt.evaluate();
                }
                _ = shutdown_requested(&mut self.shutdown) => attempt.exit = Some(Exit::Shutdown),
            }
        };

        if matches!(exit, Exit::Retry(_) | Exit::RoomOffline) {
            self.state.apply(Trigger::Degraded, id);
        }
        attempt.teardown().await;
        drop(channel);
        exit
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped handle counts as a shutdown request.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Per-attempt state: the negotiator plus the helpers started once media is
/// flowing. Dropped (and its helpers aborted) before the next attempt starts.
struct Attempt {
    id: AttemptId,
    negotiator: SessionNegotiator,
    state: StateCell,
    events: mpsc::UnboundedSender<StreamEvent>,
    config: Arc<ClientConfig>,
    frame_rate: Arc<watch::Sender<u32>>,
    connected_notified: bool,
    exit: Option<Exit>,
    helpers: Vec<TaskGuard>,
}

impl Attempt {
    fn fail(&mut self, err: TransportError) {
        if err.is_fatal() {
            self.exit = Some(Exit::Fatal(err));
            return;
        }
        tracing::warn!(target: "playlink::session", attempt = self.id, error = %err, "negotiation failed");
        self.request_exit(Exit::Retry("negotiation failed"));
    }

    fn request_exit(&mut self, exit: Exit) {
        if self.exit.is_none() {
            self.exit = Some(exit);
        }
    }

    fn notify(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(target: "playlink::session", "stream event dropped; consumer gone");
        }
    }

    fn evaluate(&mut self) {
        if self.exit.is_some() {
            return;
        }
        match self.negotiator.status() {
            NegotiationStatus::Failed => {
                self.exit = Some(Exit::Retry("peer connection failed"));
            }
            NegotiationStatus::Ready if !self.connected_notified => self.on_media_ready(),
            _ => {}
        }
    }

    fn on_media_ready(&mut self) {
        let (Some(peer), Some((audio, video))) =
            (self.negotiator.peer(), self.negotiator.media_tracks())
        else {
            return;
        };
        self.connected_notified = true;
        self.state.apply(Trigger::MediaReady, self.id);

        for track in [audio.clone(), video.clone()] {
            self.helpers.push(spawn_low_latency_playout(
                peer.clone(),
                track,
                self.config.playout_interval,
            ));
        }
        self.helpers.push(spawn_probe(
            peer,
            self.config.stats_interval,
            self.frame_rate.clone(),
        ));
        self.notify(StreamEvent::Connected(MediaStream { audio, video }));
    }

    async fn teardown(&mut self) {
        self.helpers.clear();
        self.negotiator.teardown().await;
        if self.connected_notified {
            self.connected_notified = false;
            self.notify(StreamEvent::Disconnected);
        }
    }
}

#[async_trait]
impl SignalingHandler for Attempt {
    async fn on_offer(&mut self, offer: SessionDescription) -> Result<(), TransportError> {
        tracing::debug!(target: "playlink::session", attempt = self.id, "offer received");
        self.negotiator.handle_offer(offer).await?;
        self.state.apply(Trigger::AnswerSent, self.id);
        Ok(())
    }

    async fn on_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.negotiator.handle_remote_candidate(candidate).await
    }

    async fn on_answer(&mut self, answer: AnswerBody) -> Result<(), TransportError> {
        match answer {
            AnswerBody::Status(AnswerType::Offline) => {
                self.notify(StreamEvent::RoomOffline);
                self.request_exit(Exit::RoomOffline);
            }
            AnswerBody::Status(AnswerType::InUse) => {
                tracing::info!(target: "playlink::session", room = %self.config.room, "room already in use");
            }
            AnswerBody::Status(AnswerType::Ok) => {
                tracing::debug!(target: "playlink::session", room = %self.config.room, "room accepted join");
            }
            AnswerBody::Sdp(_) => {
                tracing::debug!(target: "playlink::session", "ignoring sdp answer sent to the answering side");
            }
        }
        Ok(())
    }

    async fn on_request_stream_offline(&mut self, data: Value) -> Result<(), TransportError> {
        tracing::info!(target: "playlink::session", %data, "host reports stream offline");
        self.notify(StreamEvent::RoomOffline);
        self.request_exit(Exit::RoomOffline);
        Ok(())
    }
}
