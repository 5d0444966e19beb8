//! vidlink receiver — entry point.
//!
//! ```text
//! vidlink-receiver                     Run with vidlink.toml / defaults
//! vidlink-receiver --mode usb          Override the transport mode
//! vidlink-receiver --port 6000         Override the TCP listen port
//! vidlink-receiver --device /dev/ttyACM0
//! vidlink-receiver --config <path>     Load a custom config TOML
//! vidlink-receiver --gen-config        Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vidlink_receiver::config::ReceiverConfig;
use vidlink_receiver::service::ReceiverService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vidlink-receiver", about = "Hybrid H.264 stream receiver")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vidlink.toml")]
    config: PathBuf,

    /// Transport mode: network, usb, hybrid, all.
    #[arg(short, long)]
    mode: Option<String>,

    /// TCP listen address.
    #[arg(long)]
    host: Option<String>,

    /// TCP listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Serial device path (disables discovery).
    #[arg(short, long)]
    device: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ReceiverConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then let CLI flags win.
    let mut config = ReceiverConfig::load(&cli.config);
    if let Some(mode) = cli.mode {
        config.receiver.mode = mode;
    }
    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(device) = cli.device {
        config.serial.device = device;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vidlink-receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("mode: {}", config.receiver.mode);
    info!("tcp: {}:{}", config.network.host, config.network.port);
    if config.serial.device.is_empty() {
        info!("serial: discovery at {} baud", config.serial.baud);
    } else {
        info!("serial: {} at {} baud", config.serial.device, config.serial.baud);
    }

    let service = ReceiverService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    let stop_clone = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        stop_clone.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await;

    Ok(())
}
