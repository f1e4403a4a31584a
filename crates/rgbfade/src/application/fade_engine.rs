//! FadeEngine: turns key presses into fading LED colors.
//!
//! # How it works (for beginners)
//!
//! The engine keeps one [`FadeState`] per lit LED.  Two call sites touch that
//! collection, and both run on the same task:
//!
//! 1. **Key press** – [`FadeEngine::on_key_press`] looks the key up in the
//!    keymap and (re)starts the LED's fade at full brightness.
//! 2. **Tick** – [`FadeEngine::tick`] runs every few milliseconds.  For each
//!    active fade it computes the color the clock says the LED should have
//!    right now and pushes it.  Fades that have run their course are pushed
//!    to black once and forgotten.
//!
//! Idle LEDs are never re-sent, so an idle keyboard costs nothing.
//!
//! # Failure handling
//!
//! A failed push keeps its fade in place, so the next tick pushes the
//! up-to-date color again.  Failures are counted; a success resets the count.
//! When `max_push_failures` consecutive pushes have failed the engine stops:
//! every later `tick` returns the same [`EngineError`] without pushing, and
//! the session above it reconnects.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rgbfade_core::{DecayCurve, FadeSample, FadeState, KeyId, Keymap, LedIndex, Rgb};
use thiserror::Error;
use tracing::{debug, warn};

use crate::infrastructure::input_capture::KeyEvent;
use crate::infrastructure::lighting::LedController;
use crate::infrastructure::storage::config::AppConfig;

/// Error type for the fade engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Too many consecutive pushes failed; the SDK connection is presumed lost.
    #[error("lost the SDK connection: {failures} consecutive pushes failed (last: {last_error})")]
    SdkConnection { failures: u32, last_error: String },
}

/// Settings the engine is constructed with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeSettings {
    pub base_color: Rgb,
    pub duration: Duration,
    pub curve: DecayCurve,
    pub max_push_failures: u32,
}

impl FadeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_color: config.base_color,
            duration: config.fade_duration(),
            curve: config.decay_curve,
            max_push_failures: config.max_push_failures,
        }
    }
}

/// What one call to [`FadeEngine::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Pushes that succeeded, including final off pushes.
    pub pushed: usize,
    /// Fades that completed and were removed.
    pub finished: usize,
    /// Pushes that failed and will be retried.
    pub failed: usize,
}

/// The fade engine for one keyboard.
pub struct FadeEngine {
    controller: Arc<dyn LedController>,
    keymap: Keymap,
    settings: FadeSettings,
    active: BTreeMap<LedIndex, FadeState>,
    consecutive_failures: u32,
    stopped: Option<EngineError>,
}

impl FadeEngine {
    pub fn new(controller: Arc<dyn LedController>, keymap: Keymap, settings: FadeSettings) -> Self {
        Self {
            controller,
            keymap,
            settings,
            active: BTreeMap::new(),
            consecutive_failures: 0,
            stopped: None,
        }
    }

    /// Starts (or restarts) the fade of the LED under `key`.
    ///
    /// Returns the LED that was lit, or `None` for an unmapped key.
    pub fn on_key_press(&mut self, key: KeyId, pressed_at: Instant) -> Option<LedIndex> {
        let led = self.keymap.led_for(key)?;
        self.active.insert(
            led,
            FadeState::new(led, self.settings.base_color, pressed_at, self.settings.duration),
        );
        Some(led)
    }

    /// Key releases do not affect a fade.
    pub fn on_key_release(&mut self, _key: KeyId) {}

    /// Dispatches an input event to the press/release handlers.
    pub fn handle_event(&mut self, event: KeyEvent) {
        if event.pressed {
            if self.on_key_press(event.key, event.at).is_none() {
                debug!("{} is not mapped to an LED", event.key);
            }
        } else {
            self.on_key_release(event.key);
        }
    }

    /// Pushes the current color of every active fade.
    ///
    /// Stops at the first failed push of a tick; the remaining fades are
    /// pushed on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SdkConnection`] once `max_push_failures`
    /// consecutive pushes have failed, and on every call after that.
    pub async fn tick(&mut self, now: Instant) -> Result<TickSummary, EngineError> {
        if let Some(err) = &self.stopped {
            return Err(err.clone());
        }

        let mut summary = TickSummary::default();
        let snapshot: Vec<FadeState> = self.active.values().copied().collect();

        for state in snapshot {
            let (color, finished) = match state.sample(now, self.settings.curve) {
                FadeSample::Lit(color) => (color, false),
                FadeSample::Finished => (Rgb::BLACK, true),
            };

            match self.controller.set_color(state.led, color).await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    summary.pushed += 1;
                    if finished {
                        self.active.remove(&state.led);
                        summary.finished += 1;
                    }
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    summary.failed += 1;
                    if self.consecutive_failures >= self.settings.max_push_failures {
                        let err = EngineError::SdkConnection {
                            failures: self.consecutive_failures,
                            last_error: e.to_string(),
                        };
                        self.stopped = Some(err.clone());
                        return Err(err);
                    }
                    warn!(
                        "pushing {} failed ({}/{}): {e}",
                        state.led, self.consecutive_failures, self.settings.max_push_failures
                    );
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Best-effort: turns every LED off, forgets all fades and disconnects.
    pub async fn shutdown(&mut self) {
        self.active.clear();
        if let Err(e) = self.controller.fill(Rgb::BLACK).await {
            debug!("could not turn LEDs off during shutdown: {e}");
        }
        self.controller.disconnect().await;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, led: LedIndex) -> bool {
        self.active.contains_key(&led)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn controller(&self) -> &Arc<dyn LedController> {
        &self.controller
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::lighting::mock::{LedCommand, MockLedController};

    const BASE: Rgb = Rgb::new(255, 100, 255);

    fn settings() -> FadeSettings {
        FadeSettings {
            base_color: BASE,
            duration: Duration::from_millis(1000),
            curve: DecayCurve::Linear,
            max_push_failures: 3,
        }
    }

    fn keymap() -> Keymap {
        let mut km = Keymap::new();
        km.insert(KeyId(10), LedIndex(0));
        km.insert(KeyId(11), LedIndex(1));
        km
    }

    fn engine() -> (FadeEngine, Arc<MockLedController>) {
        let mock = Arc::new(MockLedController::keyboard(4));
        let engine = FadeEngine::new(mock.clone(), keymap(), settings());
        (engine, mock)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // ── Key handling ─────────────────────────────────────────────────────────

    #[test]
    fn test_unmapped_key_is_a_no_op() {
        let (mut engine, _mock) = engine();
        assert_eq!(engine.on_key_press(KeyId(99), Instant::now()), None);
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_key_release_does_not_touch_fades() {
        let (mut engine, _mock) = engine();
        engine.on_key_press(KeyId(10), Instant::now());
        engine.on_key_release(KeyId(10));
        assert!(engine.is_active(LedIndex(0)));
    }

    #[test]
    fn test_repeated_press_keeps_single_fade_per_led() {
        let (mut engine, _mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);
        engine.on_key_press(KeyId(10), t0 + ms(10));
        assert_eq!(engine.active_count(), 1);
    }

    // ── Ticking ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_tick_pushes_only_active_leds() {
        // Arrange
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);

        // Act
        let summary = engine.tick(t0).await.expect("tick");

        // Assert
        assert_eq!(summary.pushed, 1);
        assert_eq!(mock.set_commands(), vec![(LedIndex(0), BASE)]);
    }

    #[tokio::test]
    async fn test_finished_fade_pushes_black_once_then_nothing() {
        // Arrange
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(11), t0);

        // Act
        let done = engine.tick(t0 + ms(1000)).await.expect("tick");
        let after = engine.tick(t0 + ms(1500)).await.expect("tick");

        // Assert
        assert_eq!(done.finished, 1);
        assert_eq!(after, TickSummary::default());
        assert_eq!(mock.set_commands(), vec![(LedIndex(1), Rgb::BLACK)]);
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_fade_never_brightens() {
        // Arrange
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);

        // Act
        for step in 0..=10 {
            engine.tick(t0 + ms(step * 100)).await.expect("tick");
        }

        // Assert
        let sums: Vec<u16> = mock
            .set_commands()
            .iter()
            .map(|(_, color)| color.luminance_sum())
            .collect();
        assert!(sums.windows(2).all(|w| w[1] <= w[0]), "{sums:?}");
        assert_eq!(mock.set_commands().last(), Some(&(LedIndex(0), Rgb::BLACK)));
    }

    #[tokio::test]
    async fn test_repress_restores_full_base_color() {
        // Arrange
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);
        engine.tick(t0 + ms(600)).await.expect("tick");

        // Act
        engine.on_key_press(KeyId(10), t0 + ms(700));
        engine.tick(t0 + ms(700)).await.expect("tick");

        // Assert
        assert_eq!(mock.set_commands().last(), Some(&(LedIndex(0), BASE)));
    }

    #[tokio::test]
    async fn test_now_before_press_counts_as_zero_elapsed() {
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0 + ms(50));

        engine.tick(t0).await.expect("tick");

        assert_eq!(mock.set_commands(), vec![(LedIndex(0), BASE)]);
    }

    // ── Failures ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_failed_push_is_retried_next_tick() {
        // Arrange
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);
        mock.set_failing(true);

        // Act
        let failed = engine.tick(t0 + ms(1000)).await.expect("below threshold");
        mock.set_failing(false);
        let retried = engine.tick(t0 + ms(1016)).await.expect("tick");

        // Assert
        assert_eq!(failed.failed, 1);
        assert_eq!(retried.finished, 1);
        assert_eq!(mock.set_commands(), vec![(LedIndex(0), Rgb::BLACK)]);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);

        for round in 0..5 {
            mock.set_failing(true);
            engine.tick(t0 + ms(round * 20)).await.expect("two failures stay below 3");
            engine.tick(t0 + ms(round * 20 + 5)).await.expect("two failures stay below 3");
            mock.set_failing(false);
            engine.tick(t0 + ms(round * 20 + 10)).await.expect("success resets");
        }

        assert!(!engine.is_stopped());
    }

    #[tokio::test]
    async fn test_sustained_failure_stops_engine() {
        // Arrange
        let (mut engine, mock) = engine();
        let t0 = Instant::now();
        engine.on_key_press(KeyId(10), t0);
        engine.on_key_press(KeyId(11), t0);
        mock.set_failing(true);

        // Act
        assert!(engine.tick(t0 + ms(16)).await.is_ok());
        assert!(engine.tick(t0 + ms(32)).await.is_ok());
        let third = engine.tick(t0 + ms(48)).await;
        let calls_at_stop = mock.failed_calls();
        let fourth = engine.tick(t0 + ms(64)).await;

        // Assert
        assert!(matches!(third, Err(EngineError::SdkConnection { failures: 3, .. })));
        assert_eq!(fourth, third, "a stopped engine repeats its error");
        assert_eq!(mock.failed_calls(), calls_at_stop, "a stopped engine stops pushing");
        assert_eq!(calls_at_stop, 3, "one failed push per tick");
    }

    #[tokio::test]
    async fn test_shutdown_turns_leds_off_and_disconnects() {
        // Arrange
        let (mut engine, mock) = engine();
        engine.on_key_press(KeyId(10), Instant::now());

        // Act
        engine.shutdown().await;

        // Assert
        assert_eq!(engine.active_count(), 0);
        assert_eq!(mock.commands().last(), Some(&LedCommand::Fill(Rgb::BLACK)));
        assert!(mock.is_disconnected());
    }

    #[tokio::test]
    async fn test_handle_event_dispatches_press_and_release() {
        let (mut engine, _mock) = engine();
        let now = Instant::now();

        engine.handle_event(KeyEvent::release(KeyId(10), now));
        assert_eq!(engine.active_count(), 0);

        engine.handle_event(KeyEvent::press(KeyId(10), now));
        assert!(engine.is_active(LedIndex(0)));
    }
}
