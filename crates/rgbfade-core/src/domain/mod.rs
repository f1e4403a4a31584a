//! Domain entities for rgbfade.
//!
//! This module contains pure logic with no infrastructure dependencies.
//!
//! # What lives here? (for beginners)
//!
//! The domain is everything that makes rgbfade what it is, independent of how
//! colors reach the hardware or how key presses are read:
//!
//! - [`color`] – an 8-bit RGB color and the scaling used while fading.
//! - [`fade`] – decay curves and the timestamp-only state of one lit LED.
//! - [`keymap`] – the key-to-LED association learned by calibration and the
//!   device signature it belongs to.
//!
//! Code in outer layers (application, infrastructure) depends on the domain,
//! but the domain never depends on them.

pub mod color;
pub mod fade;
pub mod keymap;
