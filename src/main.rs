//! framecast server binary
//!
//! ```text
//! framecast --config framecast.toml
//! framecast --bind 127.0.0.1:8000 --feed-camera usb --sharing exclusive
//! RUST_LOG=framecast=debug framecast
//! ```
//!
//! Flags override values from the config file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use framecast::annotate::Passthrough;
use framecast::media::ImageCodec;
use framecast::source::SharingMode;
use framecast::{FramecastServer, ServerConfig};

const DEFAULT_LOG_FILTER: &str = "framecast=info,tower_http=info";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sharing {
    Relay,
    Exclusive,
}

impl From<Sharing> for SharingMode {
    fn from(value: Sharing) -> Self {
        match value {
            Sharing::Relay => SharingMode::Relay,
            Sharing::Exclusive => SharingMode::Exclusive,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SocketCodec {
    Jpeg,
    Webp,
}

impl From<SocketCodec> for ImageCodec {
    fn from(value: SocketCodec) -> Self {
        match value {
            SocketCodec::Jpeg => ImageCodec::Jpeg,
            SocketCodec::Webp => ImageCodec::Webp,
        }
    }
}

/// Annotated live video over MJPEG, WebSocket and WebRTC
#[derive(Debug, Parser)]
#[command(name = "framecast", version, about)]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "FRAMECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "FRAMECAST_BIND")]
    bind: Option<SocketAddr>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, env = "FRAMECAST_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Camera for MJPEG and WebSocket viewers
    #[arg(long, env = "FRAMECAST_FEED_CAMERA")]
    feed_camera: Option<String>,

    /// Camera for WebRTC offers that name none
    #[arg(long, env = "FRAMECAST_DEFAULT_CAMERA")]
    default_camera: Option<String>,

    /// What a second viewer of an open device gets
    #[arg(long, value_enum, env = "FRAMECAST_SHARING")]
    sharing: Option<Sharing>,

    /// Image codec of WebSocket messages
    #[arg(long, value_enum, env = "FRAMECAST_SOCKET_CODEC")]
    socket_codec: Option<SocketCodec>,

    /// Capture width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Capture height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Capture frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// STUN server URL; repeat for several
    #[arg(long = "stun", env = "FRAMECAST_STUN", value_delimiter = ',')]
    stun_servers: Vec<String>,

    /// ffmpeg binary
    #[arg(long, env = "FRAMECAST_FFMPEG")]
    ffmpeg: Option<PathBuf>,

    /// ffprobe binary, used to size uploaded videos
    #[arg(long, env = "FRAMECAST_FFPROBE")]
    ffprobe: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<(ServerConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(addr) = self.bind {
            config.bind_addr = addr;
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(camera) = self.feed_camera {
            config.feed_camera = camera;
        }
        if let Some(camera) = self.default_camera {
            config.default_camera = camera;
        }
        if let Some(sharing) = self.sharing {
            config.sharing = sharing.into();
        }
        if let Some(codec) = self.socket_codec {
            config.socket_codec = codec.into();
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if !self.stun_servers.is_empty() {
            config.stun_servers = self.stun_servers;
        }
        if let Some(ffmpeg) = self.ffmpeg {
            config.binaries.ffmpeg = ffmpeg;
        }
        if let Some(ffprobe) = self.ffprobe {
            config.binaries.ffprobe = ffprobe;
        }

        config.validate()?;
        Ok((config, self.check))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let (config, check_only) = Cli::parse().into_config().context("invalid configuration")?;
    if check_only {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!(
        bind = %config.bind_addr,
        feed_camera = %config.feed_camera,
        default_camera = %config.default_camera,
        fps = config.capture.fps,
        "Starting framecast"
    );

    let server = FramecastServer::new(config, Arc::new(Passthrough)).context("failed to start server")?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
