use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{PeerId, StreamProtocol, Swarm, identify, noise, ping, tcp, yamux};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::compat::FuturesAsyncReadCompatExt;

use crate::config::RelayAddress;
use crate::task::TaskGuard;
use crate::transport::{TransportError, to_setup_error};

const IDENTIFY_PROTOCOL: &str = "/ipfs/id/1.0.0";
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

pub trait Substream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Substream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An opened application substream plus whatever keeps its connection alive.
pub struct DialedSubstream {
    pub stream: Box<dyn Substream>,
    driver: Option<TaskGuard>,
}

impl DialedSubstream {
    pub fn new(stream: Box<dyn Substream>) -> Self {
        Self {
            stream,
            driver: None,
        }
    }

    fn with_driver(stream: Box<dyn Substream>, driver: TaskGuard) -> Self {
        Self {
            stream,
            driver: Some(driver),
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Substream>, Option<TaskGuard>) {
        (self.stream, self.driver)
    }
}

#[async_trait]
pub trait RelayDialer: Send + Sync {
    /// Dial the relay peer and open exactly one substream speaking `protocol`.
    async fn dial(
        &self,
        relay: &RelayAddress,
        protocol: &str,
    ) -> Result<DialedSubstream, TransportError>;
}

#[derive(NetworkBehaviour)]
struct RelayBehaviour {
    identify: identify::Behaviour,
    ping: ping::Behaviour,
    stream: libp2p_stream::Behaviour,
}

/// Dials over TCP with Noise encryption and yamux multiplexing. Each dial
/// uses a fresh identity and swarm; the swarm lives as long as the returned
/// substream.
#[derive(Debug, Clone)]
pub struct Libp2pDialer {
    dial_timeout: Duration,
}

impl Libp2pDialer {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

#[async_trait]
impl RelayDialer for Libp2pDialer {
    async fn dial(
        &self,
        relay: &RelayAddress,
        protocol: &str,
    ) -> Result<DialedSubstream, TransportError> {
        let protocol =
            StreamProtocol::try_from_owned(protocol.to_string()).map_err(to_setup_error)?;
        let mut swarm = build_swarm()?;
        let peer = relay.peer_id();

        tracing::debug!(target: "playlink::relay", %relay, "dialing relay");
        swarm
            .dial(relay.multiaddr().clone())
            .map_err(|err| TransportError::Dial(err.to_string()))?;

        let mut control = swarm.behaviour().stream.new_control();
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = TaskGuard::spawn(drive_swarm(swarm, peer, ready_tx));

        match timeout(self.dial_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => return Err(TransportError::Dial(reason)),
            Ok(Err(_)) => return Err(TransportError::Dial("swarm stopped".into())),
            Err(_) => return Err(TransportError::Timeout("relay connection")),
        }

        let stream = timeout(self.dial_timeout, control.open_stream(peer, protocol))
            .await
            .map_err(|_| TransportError::Timeout("substream open"))?
            .map_err(|err| TransportError::Substream(err.to_string()))?;
        tracing::debug!(target: "playlink::relay", %peer, "signaling substream open");

        Ok(DialedSubstream::with_driver(Box::new(stream.compat()), driver))
    }
}

fn build_swarm() -> Result<Swarm<RelayBehaviour>, TransportError> {
    Ok(libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(to_setup_error)?
        .with_dns()
        .map_err(to_setup_error)?
        .with_behaviour(|key| {
            Ok(RelayBehaviour {
                identify: identify::Behaviour::new(identify::Config::new(
                    IDENTIFY_PROTOCOL.to_string(),
                    key.public(),
                )),
                ping: ping::Behaviour::default(),
                stream: libp2p_stream::Behaviour::default(),
            })
        })
        .map_err(to_setup_error)?
        .with_swarm_config(|config| config.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build())
}

/// Polls the swarm until aborted. The first connection outcome for `relay`
/// is reported through `ready`.
async fn drive_swarm(
    mut swarm: Swarm<RelayBehaviour>,
    relay: PeerId,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } if peer_id == relay => {
                tracing::debug!(
                    target: "playlink::relay",
                    %peer_id,
                    address = %endpoint.get_remote_address(),
                    "relay connection established"
                );
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                tracing::warn!(target: "playlink::relay", ?peer_id, %error, "relay dial failed");
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(error.to_string()));
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => match cause {
                Some(err) => {
                    tracing::warn!(target: "playlink::relay", %peer_id, error = %err, "relay connection closed")
                }
                None => tracing::debug!(target: "playlink::relay", %peer_id, "relay connection closed"),
            },
            SwarmEvent::Behaviour(RelayBehaviourEvent::Ping(event)) => {
                if let Ok(rtt) = event.result {
                    tracing::trace!(target: "playlink::relay", rtt_ms = rtt.as_millis() as u64, "relay ping");
                }
            }
            other => tracing::trace!(target: "playlink::relay", event = ?other, "swarm event"),
        }
    }
}
