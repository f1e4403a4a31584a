//! Command-line interface.
//!
//! ```text
//! rgbfade [--config <PATH>] [COMMAND]
//!
//! Commands:
//!   run               Calibrate if needed, then fade (default)
//!   setup <LOCATION>  Re-calibrate one keyboard, replacing its keymap
//!   devices           List keyboards and their keymap status
//! ```
//!
//! `--config` can also be set through `RGBFADE_CONFIG`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Reactive keyboard fade effect for the OpenRGB SDK server.
#[derive(Debug, Parser)]
#[command(name = "rgbfade", version, about)]
pub struct Cli {
    /// Path of the config file.  Defaults to the platform config directory.
    #[arg(long, global = true, env = "RGBFADE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Calibrate keyboards without a keymap, then run the fade effect.
    Run,
    /// Force re-calibration of the keyboard at LOCATION.
    Setup {
        /// Device location as shown by `rgbfade devices`, e.g. "HID: /dev/hidraw3".
        location: String,
    },
    /// List keyboards reported by the SDK server.
    Devices,
}

impl Cli {
    /// The subcommand to run; no subcommand means [`Command::Run`].
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
