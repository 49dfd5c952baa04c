//! DeviceMirror - mirror an Android device through the ADB server
//!
//! Runs one headless session: frames are counted rather than displayed,
//! and `--record <path>` writes the raw video stream to a file.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use device_mirror::{
    adb::{AdbDevice, AdbServerClient},
    config::{BridgeConfig, BridgeMode, ConfigManager},
    logging::{init_logging, LogLevel},
    render::{AnnexBRecorder, HeadlessSurface, NullDecoderFactory, Recorder},
    session::{RecorderFactory, SessionConfig, SessionManager},
    transport::{ConnectOptions, Connector, TcpConnector, WebSocketConnector},
};

const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Mirror an Android device through the ADB server
#[derive(Debug, Parser)]
#[command(name = "device-mirror", version, about)]
struct Args {
    /// Serial of the device to mirror; defaults to the first online device
    #[arg(short, long, env = "ANDROID_SERIAL")]
    serial: Option<String>,

    /// Write the raw video stream to this file
    #[arg(short, long)]
    record: Option<PathBuf>,
}

fn build_connector(bridge: &BridgeConfig) -> Arc<dyn Connector> {
    match bridge.mode {
        BridgeMode::WebSocket => Arc::new(WebSocketConnector::new(&bridge.host, bridge.port)),
        BridgeMode::Tcp => Arc::new(TcpConnector::new(bridge.host.clone(), bridge.port)),
    }
}

async fn pick_serial(client: &AdbServerClient, requested: Option<String>) -> anyhow::Result<String> {
    if let Some(serial) = requested {
        return Ok(serial);
    }

    let devices = client
        .devices()
        .await
        .context("Failed to list devices")?;
    for device in &devices {
        info!("Found device {} ({})", device.serial, device.state);
    }

    devices
        .into_iter()
        .find(|device| device.is_online())
        .map(|device| device.serial)
        .context("No online device found")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load_or_create_default()?;
    info!(
        "Configuration loaded from: {:?}",
        config_manager.config_directory()
    );
    info!(
        "Video - {} {} bps, max size {}, max fps {}",
        config.video.codec, config.video.bit_rate, config.video.max_size, config.video.max_fps
    );

    let connector = build_connector(&config.bridge);
    let client = AdbServerClient::new(connector)
        .with_options(ConnectOptions::default().with_timeout(config.bridge.connect_timeout()));

    let serial = pick_serial(&client, args.serial.or_else(|| config.bridge.serial.clone())).await?;
    let device = AdbDevice::new(client, serial.clone()).with_tunnel_retry(
        config.bridge.tunnel_attempts,
        config.bridge.tunnel_retry_delay(),
    );

    let mut manager = SessionManager::new(
        SessionConfig::from_config(&config),
        Arc::new(NullDecoderFactory::new()),
    );
    if let Some(path) = args.record {
        let factory: RecorderFactory = Arc::new(move |serial: &str| {
            match AnnexBRecorder::create(&path) {
                Ok(recorder) => Some(Box::new(recorder) as Box<dyn Recorder>),
                Err(e) => {
                    warn!("Not recording {}: {}", serial, e);
                    None
                }
            }
        });
        manager = manager.with_recorder_factory(factory);
    }

    let surface = Arc::new(HeadlessSurface::new(1280.0, 720.0));
    let handle = manager
        .add_connection(Arc::new(device), surface)
        .await
        .with_context(|| format!("Failed to start mirroring {}", serial))?;

    info!("Mirroring {} (session {})", handle.serial, handle.session_id);
    info!("  Press Ctrl+C to exit");

    let session = manager
        .get(&serial)
        .await
        .context("Session vanished after start")?;
    let mut ticker = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            _ = handle.exited.cancelled() => {
                warn!("Device {} stopped streaming", serial);
                break;
            }
            _ = ticker.tick() => {
                let metrics = session.sample_metrics();
                let (width, height) = session.video_size();
                info!(
                    "{}x{} {} | {:.1} fps | {:.2} Mbps | {} frames",
                    width,
                    height,
                    session.rotation(),
                    metrics.fps,
                    metrics.bit_rate / 1_000_000.0,
                    metrics.frames
                );
            }
        }
    }

    info!("Shutting down DeviceMirror...");
    manager.stop_all().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Check for debug mode via environment variable
    let log_level = if std::env::var("RUST_LOG").is_ok() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    init_logging(log_level);

    info!("Starting DeviceMirror v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("DeviceMirror stopped.");
}
