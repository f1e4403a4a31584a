//! Time-based LED fade: decay curves and the state of one lit LED.
//!
//! # How a fade is computed (for beginners)
//!
//! A [`FadeState`] stores only *when* the LED was lit, for *how long* it should
//! fade, and *which* color it started at.  It never stores the current
//! brightness.  Every tick the current color is recomputed from scratch:
//!
//! ```text
//! t      = (now - lit_at) / duration          (clamped to 0..=1)
//! factor = decay(t)                           (1.0 at t = 0, 0.0 at t = 1)
//! color  = base_color * factor
//! ```
//!
//! Because nothing accumulates between ticks, a late or skipped tick cannot
//! make the LED drift: the color is always exactly what the clock says it
//! should be.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::color::Rgb;
use super::keymap::LedIndex;

/// Steepness `k` of the normalized exponential curve.
pub const EXPONENTIAL_STEEPNESS: f32 = 5.0;

/// Shape of the brightness decay over the fade duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayCurve {
    /// `decay(t) = 1 - t`.
    #[default]
    Linear,
    /// `decay(t) = (e^(-k t) - e^(-k)) / (1 - e^(-k))`.
    ///
    /// Drops quickly right after the press and lingers dimly near the end,
    /// while still reaching exactly zero at `t = 1`.
    Exponential,
}

impl DecayCurve {
    /// Brightness factor for normalized elapsed time `t`.
    ///
    /// `t` is clamped to `[0.0, 1.0]`.  The result is `1.0` at `t = 0`, `0.0`
    /// at `t = 1`, and never increases as `t` grows.
    pub fn factor(self, t: f32) -> f32 {
        let t = if t.is_nan() { 1.0 } else { t.clamp(0.0, 1.0) };
        match self {
            DecayCurve::Linear => 1.0 - t,
            DecayCurve::Exponential => {
                let k = EXPONENTIAL_STEEPNESS;
                let floor = (-k).exp();
                (((-k * t).exp() - floor) / (1.0 - floor)).clamp(0.0, 1.0)
            }
        }
    }
}

/// Result of sampling a [`FadeState`] at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeSample {
    /// The fade is still running; push this color.
    Lit(Rgb),
    /// The fade has completed; push the off color and drop the state.
    Finished,
}

/// Fade bookkeeping for one lit LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeState {
    pub led: LedIndex,
    pub base_color: Rgb,
    pub lit_at: Instant,
    pub duration: Duration,
}

impl FadeState {
    pub fn new(led: LedIndex, base_color: Rgb, lit_at: Instant, duration: Duration) -> Self {
        Self {
            led,
            base_color,
            lit_at,
            duration,
        }
    }

    /// Time since the LED was lit; zero when `now` is before `lit_at`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lit_at)
    }

    /// Computes the LED color at `now` using `curve`.
    ///
    /// Returns [`FadeSample::Finished`] once `elapsed >= duration` (including a
    /// zero duration).
    pub fn sample(&self, now: Instant, curve: DecayCurve) -> FadeSample {
        let elapsed = self.elapsed(now);
        if elapsed >= self.duration {
            return FadeSample::Finished;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        FadeSample::Lit(self.base_color.scale(curve.factor(t)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
