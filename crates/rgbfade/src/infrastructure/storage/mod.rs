//! Local persistence: the config file and per-device keymaps.
//!
//! Both files are small TOML documents under the platform config directory.
//! The config is read once at startup; keymaps are read when a keyboard is
//! attached and written when calibration completes.

pub mod config;
pub mod keymap_store;
