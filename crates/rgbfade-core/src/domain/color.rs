//! 8-bit RGB color used for every LED push.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A color with one byte per channel.
///
/// Serialized as a TOML/serde table so config files read naturally:
///
/// ```toml
/// base_color = { r = 255, g = 100, b = 255 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// All channels off.
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    /// All channels at full intensity.
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scales every channel by `factor`, rounding to the nearest integer.
    ///
    /// `factor` is clamped to `[0.0, 1.0]`; NaN is treated as `0.0`.  Because
    /// each channel is a monotonic function of `factor`, a non-increasing
    /// sequence of factors produces a non-increasing sequence of colors.
    pub fn scale(self, factor: f32) -> Rgb {
        let factor = if factor.is_nan() {
            0.0
        } else {
            factor.clamp(0.0, 1.0)
        };
        let channel = |c: u8| (f32::from(c) * factor).round() as u8;
        Rgb::new(channel(self.r), channel(self.g), channel(self.b))
    }

    /// Returns `true` when every channel is zero.
    pub fn is_black(self) -> bool {
        self == Rgb::BLACK
    }

    /// Sum of all channels; used as a brightness measure in tests and logs.
    pub fn luminance_sum(self) -> u16 {
        u16::from(self.r) + u16::from(self.g) + u16::from(self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_by_one_keeps_color() {
        let c = Rgb::new(255, 100, 7);
        assert_eq!(c.scale(1.0), c);
    }

    #[test]
    fn test_scale_by_zero_is_black() {
        assert!(Rgb::new(255, 100, 7).scale(0.0).is_black());
    }

    #[test]
    fn test_scale_rounds_to_nearest() {
        // Arrange
        let c = Rgb::new(255, 100, 3);

        // Act
        let half = c.scale(0.5);

        // Assert – 127.5 rounds away from zero, 1.5 rounds to 2
        assert_eq!(half, Rgb::new(128, 50, 2));
    }

    #[test]
    fn test_scale_clamps_out_of_range_factors() {
        let c = Rgb::new(10, 20, 30);
        assert_eq!(c.scale(2.0), c);
        assert_eq!(c.scale(-1.0), Rgb::BLACK);
        assert_eq!(c.scale(f32::NAN), Rgb::BLACK);
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        assert_eq!(Rgb::new(255, 100, 255).to_string(), "#ff64ff");
    }

    #[test]
    fn test_rgb_deserializes_from_toml_table() {
        #[derive(Deserialize)]
        struct Wrapper {
            color: Rgb,
        }
        let w: Wrapper = toml::from_str("color = { r = 1, g = 2, b = 3 }").expect("parse");
        assert_eq!(w.color, Rgb::new(1, 2, 3));
    }
}
