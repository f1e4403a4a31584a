//! rgbfade library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does rgbfade do? (for beginners)
//!
//! rgbfade makes a keyboard's RGB backlight react to typing.  Each key press
//! lights the LED under that key in the base color, and the LED then fades
//! back to off over the configured duration.
//!
//! The LEDs are driven through the OpenRGB SDK server, a separate daemon
//! reached over TCP with the `openrgb2` client.  The SDK exposes a keyboard only
//! as a flat list of LEDs, so rgbfade has to learn which LED sits under which
//! key.  The first run does that through a calibration wizard and saves the
//! result as a keymap file.
//!
//! The application:
//!
//! 1. Loads (or creates) the TOML config file.
//! 2. Asks the SDK server which keyboards are attached.
//! 3. Loads each keyboard's keymap, calibrating the keyboard when none fits.
//! 4. Reads key events from each keyboard's hidraw node on its own thread.
//! 5. Runs one fade session per keyboard until Ctrl-C, then turns the LEDs
//!    off.  Meanwhile it keeps asking the server for keyboards, attaching new
//!    ones and ones that came back, and calibrates a device that replaced
//!    another at the same location.

/// Composition root and top-level commands.
pub mod app;

/// Application layer: calibration, fade engine, device sessions.
pub mod application;

/// Command-line interface definition.
pub mod cli;

/// Fatal errors and exit codes.
pub mod error;

/// Infrastructure layer: SDK client, key capture, config and keymap files.
pub mod infrastructure;
