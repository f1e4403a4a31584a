//! rgbfade entry point.
//!
//! Parses the command line, loads the config, initialises logging and hands
//! over to [`App`].
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ Cli::parse()
//!  └─ load_or_create(config.toml)   -- first run writes the defaults
//!  └─ tracing subscriber            -- RUST_LOG, else config log_level
//!                                      (then the first-run notice is logged)
//!  └─ Ctrl-C task                   -- fires the shutdown signal
//!  └─ App::run / setup / devices
//! ```
//!
//! # Exit codes
//!
//! Errors travel up as `anyhow::Error`.  When the chain contains a
//! [`FatalError`] its category picks the exit code (see `rgbfade::error`);
//! anything else exits with 1.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rgbfade::app::{App, DeviceStatus};
use rgbfade::application::shutdown::shutdown_channel;
use rgbfade::cli::{Cli, Command};
use rgbfade::error::{exit_code_for, FatalError};
use rgbfade::infrastructure::storage::config::{config_file_path, load_or_create, ConfigOrigin};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("rgbfade: {e:#}");
        std::process::exit(exit_code_for(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().map_err(FatalError::from)?,
    };
    let (config, origin) = load_or_create(&config_path)
        .map_err(FatalError::from)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_logging(&config.log_level);
    if origin == ConfigOrigin::Created {
        info!("wrote default config to {}", config_path.display());
    }
    info!("rgbfade starting with config {}", config_path.display());

    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let app = App::with_openrgb(config, &config_dir);

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                trigger.trigger();
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    match cli.command() {
        Command::Run => app.run(shutdown).await?,
        Command::Setup { location } => app
            .setup(&location, shutdown)
            .await
            .with_context(|| format!("calibrating {location}"))?,
        Command::Devices => print_devices(&app.devices(shutdown).await?),
    }

    info!("rgbfade stopped");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the config's `log_level`; otherwise `info`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_devices(devices: &[DeviceStatus]) {
    if devices.is_empty() {
        println!("No keyboards reported by the OpenRGB SDK server.");
        return;
    }
    for status in devices {
        let d = &status.device;
        println!(
            "{:<24} {} {} ({} LEDs) - {}",
            d.location, d.vendor, d.name, d.led_count, status.keymap
        );
    }
}
