use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use playlink_client_core::config::{DEFAULT_RETRY_DELAY, DEFAULT_STUN_URL, RELAY_ENV, ROOM_ENV};
use playlink_client_core::input::terminal::forward_terminal_input;
use playlink_client_core::input::{InputCapture, InputSender};
use playlink_client_core::task::TaskGuard;
use playlink_client_core::telemetry::logging::{self, LogConfig, LogLevel};
use playlink_client_core::transport::relay::Libp2pDialer;
use playlink_client_core::transport::webrtc::NativeConnector;
use playlink_client_core::{
    ClientConfig, MediaStream, ReconnectSupervisor, RelayAddress, RoomName, StreamEvent,
};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "playlink", about = "Cloud gaming client transport")]
struct Cli {
    /// Relay multiaddr, ending in /p2p/<peer id>.
    #[arg(long, env = RELAY_ENV)]
    relay: RelayAddress,

    /// Room (host) to join.
    #[arg(long, env = ROOM_ENV)]
    room: RoomName,

    #[arg(long, default_value = DEFAULT_STUN_URL)]
    stun: String,

    /// Seconds to wait before reconnecting.
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.as_secs())]
    retry_secs: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,

    #[arg(long, help = "Do not read keyboard and mouse from the terminal")]
    no_input: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let no_input = cli.no_input;
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("initialising logging")?;

    let config = ClientConfig::new(cli.relay, cli.room)
        .with_stun_url(cli.stun)
        .with_retry_delay(Duration::from_secs(cli.retry_secs));
    let dialer = Arc::new(Libp2pDialer::new(config.dial_timeout));
    let (handle, mut events) = ReconnectSupervisor::new(config, dialer, Arc::new(NativeConnector))
        .spawn()
        .context("starting supervisor")?;

    let (sender, _pump) = InputSender::spawn(handle.data_channel());
    let (raw_tx, raw_rx) = mpsc::channel(256);
    let capture = tokio::spawn(InputCapture::new(sender, handle.frame_rate()).run(raw_rx));
    let terminal = async {
        if no_input {
            drop(raw_tx);
            std::future::pending::<std::io::Result<()>>().await
        } else {
            forward_terminal_input(raw_tx).await
        }
    };
    tokio::pin!(terminal);

    let mut sinks: Vec<TaskGuard> = Vec::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Connected(stream)) => {
                    tracing::info!(target: "playlink::app", "stream connected");
                    sinks = drain_media(stream);
                }
                Some(StreamEvent::Disconnected) => {
                    tracing::info!(target: "playlink::app", "stream disconnected");
                    sinks.clear();
                }
                Some(StreamEvent::RoomOffline) => {
                    tracing::info!(target: "playlink::app", "room offline; waiting for host");
                }
                None => break,
            },
            result = &mut terminal => {
                result.context("reading terminal input")?;
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sinks.clear();
    capture.abort();
    handle.shutdown().await.context("stopping supervisor")?;
    Ok(())
}

/// The binary has no renderer; it reads the tracks so the receivers keep
/// flowing and the frame-rate meter sees packets.
fn drain_media(stream: MediaStream) -> Vec<TaskGuard> {
    [stream.audio, stream.video]
        .into_iter()
        .map(|track| {
            TaskGuard::spawn(async move {
                let kind = track.kind().as_str();
                let mut packets: u64 = 0;
                while let Ok(packet) = track.read_packet().await {
                    packets += 1;
                    if packets % 1000 == 0 {
                        tracing::debug!(
                            target: "playlink::app",
                            kind,
                            packets,
                            last_len = packet.payload.len(),
                            "media flowing"
                        );
                    }
                }
                tracing::debug!(target: "playlink::app", kind, packets, "media track ended");
            })
        })
        .collect()
}
