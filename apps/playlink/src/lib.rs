pub mod config;
pub mod input;
pub mod session;
pub mod task;
pub mod telemetry;
pub mod transport;

pub use config::{ClientConfig, ConfigError, RelayAddress, RoomName};
pub use session::supervisor::{
    ConnectionState, MediaStream, ReconnectSupervisor, StreamEvent, SupervisorHandle,
};
