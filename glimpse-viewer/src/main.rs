//! glimpse viewer — entry point.
//!
//! ```text
//! glimpse-viewer                    Mirror with defaults
//! glimpse-viewer --config <path>   Use custom config TOML
//! glimpse-viewer --serial <id>     Pick a specific device
//! glimpse-viewer --gen-config      Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use glimpse_core::{DecoderFactory, SessionController, SessionPhase, VideoDecoder};

use glimpse_viewer::config::ViewerConfig;
use glimpse_viewer::decode::H264Decoder;
use glimpse_viewer::link::{AdbLink, DirPayloadSource};
use glimpse_viewer::window::FloatingWindow;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "glimpse-viewer", about = "Floating-window Android screen mirror")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "glimpse-viewer.toml")]
    config: PathBuf,

    /// Device serial (overrides config).
    #[arg(short, long)]
    serial: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(serial) = cli.serial {
        config.device.serial = serial;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("glimpse-viewer v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Assemble the session ─────────────────────────────────

    let payload_dir = if config.device.payload_dir.is_empty() {
        std::env::current_dir()?
    } else {
        PathBuf::from(&config.device.payload_dir)
    };
    let payloads = Arc::new(DirPayloadSource::new(payload_dir));

    let serial = (!config.device.serial.is_empty()).then(|| config.device.serial.clone());
    let link = Arc::new(AdbLink::new(
        &config.device.adb_path,
        serial,
        config.device.forward_port,
    ));

    let decoders: DecoderFactory =
        Arc::new(|| H264Decoder::new().map(|d| Box::new(d) as Box<dyn VideoDecoder>));

    let controller = SessionController::new(link, payloads, decoders, config.agent_config());
    let mut window = FloatingWindow::new(&config.window);

    // ── 2. Bring the session up ─────────────────────────────────

    controller.start().await;
    match controller.phase() {
        SessionPhase::Streaming => info!("streaming"),
        SessionPhase::Error { message } => {
            error!("session failed: {message}");
            return Err(message.into());
        }
        phase => warn!("unexpected phase after start: {phase}"),
    }

    let mut geometry_rx = controller.geometry_receiver();
    let stats_rx = controller.stats_receiver();
    let mut ticker = tokio::time::interval(Duration::from_secs(5));

    // ── 3. Event loop ───────────────────────────────────────────

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }

            changed = async {
                match geometry_rx.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                if changed.is_err() {
                    // Sender gone; the session phase will reflect it.
                    geometry_rx = None;
                    continue;
                }
                let geometry = geometry_rx
                    .as_mut()
                    .and_then(|rx| *rx.borrow_and_update());
                if let Some(geometry) = geometry {
                    let rect = window.apply_geometry(geometry);
                    info!(
                        "device {geometry}; window {}x{} at ({}, {})",
                        rect.width, rect.height, rect.x, rect.y
                    );
                }
            }

            _ = ticker.tick() => {
                if let Some(stats) = stats_rx.as_ref().map(|rx| rx.borrow().clone()) {
                    info!(
                        fps = format!("{:.1}", stats.fps),
                        packets = stats.total_packets,
                        frames = stats.total_frames,
                        bytes = stats.total_bytes,
                        "pipeline"
                    );
                }
                if controller.permission_warning() {
                    warn!("device rejects input injection; taps will be ignored");
                    controller.dismiss_permission_warning();
                }
                if let SessionPhase::Error { message } = controller.phase() {
                    error!("session failed: {message}");
                    break;
                }
            }
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    controller.close().await;
    info!("closed");
    Ok(())
}
