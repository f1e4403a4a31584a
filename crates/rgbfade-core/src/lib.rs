//! # rgbfade-core
//!
//! Shared library for rgbfade containing the fade math and the keymap model.
//!
//! This crate has zero dependencies on OS APIs, sockets, or the file system,
//! so every piece of it can be unit-tested in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! rgbfade makes a keyboard's backlight react to typing: when a key is pressed
//! its LED lights up at full brightness and then fades out.  The lighting is
//! driven through the OpenRGB SDK server, which only exposes a flat list of
//! LEDs per device, so the tool first has to learn which LED sits under which
//! key (calibration).
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure logic: [`Rgb`] colors, the [`DecayCurve`] used to fade
//!   an LED out, the per-LED [`FadeState`], and the [`Keymap`] that links key
//!   ids to LED indices for one [`DeviceSignature`].
//!
//! Talking to the OpenRGB SDK server is left to the `rgbfade` crate, which
//! drives it through the `openrgb2` client.

pub mod domain;

// Re-export the most-used types at the crate root so callers can write
// `rgbfade_core::Keymap` instead of `rgbfade_core::domain::keymap::Keymap`.
pub use domain::color::Rgb;
pub use domain::fade::{DecayCurve, FadeSample, FadeState};
pub use domain::keymap::{DeviceSignature, KeyId, Keymap, KeymapEntry, KeymapError, LedIndex};
