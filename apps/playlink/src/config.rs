use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use webrtc::ice::url::Url as IceUrl;

pub const RELAY_ENV: &str = "PLAYLINK_RELAY";
pub const ROOM_ENV: &str = "PLAYLINK_ROOM";

pub const SIGNALING_PROTOCOL: &str = "/playlink-relay/stream-request/1.0.0";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_PLAYOUT_INTERVAL: Duration = Duration::from_millis(15);
pub const DEFAULT_FRAME_RATE: u32 = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid relay address {address:?}: {reason}")]
    InvalidRelayAddress { address: String, reason: String },
    #[error("invalid room name {0:?}")]
    InvalidRoom(String),
    #[error("invalid signaling protocol {0:?}")]
    InvalidProtocol(String),
    #[error("invalid stun url {url:?}: {reason}")]
    InvalidStunUrl { url: String, reason: String },
}

/// Multiaddr of the relay peer. Always ends in `/p2p/<peer id>` so the
/// substream can be opened against a known identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAddress {
    addr: Multiaddr,
    peer: PeerId,
}

impl RelayAddress {
    pub fn multiaddr(&self) -> &Multiaddr {
        &self.addr
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer
    }
}

impl FromStr for RelayAddress {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidRelayAddress {
            address: value.to_string(),
            reason,
        };
        let addr: Multiaddr = value.trim().parse().map_err(|err| invalid(format!("{err}")))?;
        match addr.iter().last() {
            Some(Protocol::P2p(peer)) => Ok(Self { addr, peer }),
            _ => Err(invalid("missing trailing /p2p/<peer id>".into())),
        }
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomName(String);

impl RoomName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomName {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ConfigError::InvalidRoom(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a supervisor needs to join one room.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay: RelayAddress,
    pub room: RoomName,
    pub stun_url: String,
    pub protocol: String,
    pub retry_delay: Duration,
    pub dial_timeout: Duration,
    pub stats_interval: Duration,
    pub playout_interval: Duration,
    pub default_frame_rate: u32,
}

impl ClientConfig {
    pub fn new(relay: RelayAddress, room: RoomName) -> Self {
        Self {
            relay,
            room,
            stun_url: DEFAULT_STUN_URL.to_string(),
            protocol: SIGNALING_PROTOCOL.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            stats_interval: DEFAULT_STATS_INTERVAL,
            playout_interval: DEFAULT_PLAYOUT_INTERVAL,
            default_frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    /// Load relay and room from `PLAYLINK_RELAY` / `PLAYLINK_ROOM`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let relay = env::var(RELAY_ENV).map_err(|_| ConfigError::Missing(RELAY_ENV))?;
        let room = env::var(ROOM_ENV).map_err(|_| ConfigError::Missing(ROOM_ENV))?;
        Ok(Self::new(relay.parse()?, room.parse()?))
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_stun_url(mut self, url: impl Into<String>) -> Self {
        self.stun_url = url.into();
        self
    }

    /// Checks the fields that are not validated by their types. Called once
    /// by the supervisor before the first dial.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.protocol.starts_with('/') {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }
        validate_ice_url(&self.stun_url)
    }

    pub fn ice_servers(&self) -> Vec<String> {
        vec![self.stun_url.clone()]
    }

    pub fn frame_interval(fps: u32) -> Duration {
        Duration::from_secs(1) / fps.max(1)
    }
}

const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

fn validate_ice_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidStunUrl {
        url: url.to_string(),
        reason,
    };
    if !ICE_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(invalid("scheme must be stun:, stuns:, turn: or turns:".into()));
    }
    let parsed = IceUrl::parse_url(url).map_err(|err| invalid(err.to_string()))?;
    if parsed.host.is_empty() {
        return Err(invalid("missing host".into()));
    }
    Ok(())
}
