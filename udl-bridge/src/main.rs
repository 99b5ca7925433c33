//! udl-bridge entry point.
//!
//! ```text
//! udl-bridge                     Stream the configured pattern
//! udl-bridge --config <path>     Load a custom config TOML
//! udl-bridge --gen-config        Write default config to stdout
//! udl-bridge --frames <file>     Stream raw RGB565 frames from a file
//! udl-bridge --pattern solid     Override the configured pattern
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use udl_bridge::config::BridgeConfig;
use udl_bridge::pattern::{FrameSource, Pattern};
use udl_bridge::service::BridgeService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "udl-bridge", about = "Stream frames to a USB display adapter over UDP")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "udl-bridge.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Raw RGB565 frame file, one full screen per frame.
    #[arg(long, conflicts_with = "pattern")]
    frames: Option<PathBuf>,

    /// Test pattern to stream instead of the configured one.
    #[arg(long, value_enum)]
    pattern: Option<Pattern>,

    /// Stop after this many frames.
    #[arg(long)]
    count: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&BridgeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = BridgeConfig::load(&cli.config);
    if let Some(count) = cli.count {
        config.stream.frame_limit = count;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("udl-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("mode: {}x{}", config.mode.xres, config.mode.yres);
    info!("remote: {}", config.network.remote);
    info!("target FPS: {}", config.stream.fps);

    let source = match &cli.frames {
        Some(path) => FrameSource::open_file(path, &config.mode).await?,
        None => FrameSource::Pattern(cli.pattern.unwrap_or(config.stream.pattern)),
    };

    let service = BridgeService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    let metrics = service.run(source).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    Ok(())
}
