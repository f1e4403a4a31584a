//! Calibration: learning which LED sits under which key.
//!
//! # The procedure (for beginners)
//!
//! The SDK lists a keyboard's LEDs in an order that says nothing about the
//! physical keys.  Calibration walks the list one LED at a time:
//!
//! ```text
//! for i in 0..N:
//!     all LEDs off, LED i in the prompt color
//!     wait for a key press ─┬─ key k pressed → record (k → i)
//!                           └─ window expires → LED i stays unmapped
//! all LEDs off, save the keymap
//! ```
//!
//! Pressing a key that was already recorded moves it to the current LED; the
//! LED it was recorded for becomes unmapped.  Key releases are ignored.
//!
//! The procedure is split in two: [`Calibration`] is the pure state machine,
//! [`CalibrationWizard`] drives it against real LEDs and real key events.

use std::sync::Arc;
use std::time::Duration;

use rgbfade_core::{KeyId, Keymap, LedIndex, Rgb};
use thiserror::Error;
use tokio::time;
use tracing::{info, warn};

use super::shutdown::ShutdownSignal;
use crate::infrastructure::input_capture::KeyEventReceiver;
use crate::infrastructure::lighting::{LedController, SdkError};
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::keymap_store::{KeymapStore, KeymapStoreError};

/// Error type for calibration.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("lighting the calibration prompt failed: {0}")]
    Sdk(#[from] SdkError),
    #[error("keyboard input closed during calibration")]
    InputClosed,
    #[error("saving the keymap failed: {0}")]
    Store(#[from] KeymapStoreError),
}

// ── State machine ─────────────────────────────────────────────────────────────

/// Where the calibration currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    /// Waiting for the key under this LED.
    Lighting(LedIndex),
    /// Every LED has been handled.
    Done,
}

/// Result of recording a key for the current LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Mapped { key: KeyId, led: LedIndex },
    /// The key had been recorded before; `previous` is now unmapped.
    Remapped {
        key: KeyId,
        led: LedIndex,
        previous: LedIndex,
    },
}

/// Pure calibration state over LEDs `0..led_count`.
#[derive(Debug, Clone)]
pub struct Calibration {
    led_count: u32,
    next: u32,
    keymap: Keymap,
    skipped: Vec<LedIndex>,
}

impl Calibration {
    pub fn new(led_count: u32) -> Self {
        Self {
            led_count,
            next: 0,
            keymap: Keymap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn step(&self) -> CalibrationStep {
        if self.next < self.led_count {
            CalibrationStep::Lighting(LedIndex(self.next))
        } else {
            CalibrationStep::Done
        }
    }

    pub fn is_done(&self) -> bool {
        self.step() == CalibrationStep::Done
    }

    pub fn led_count(&self) -> u32 {
        self.led_count
    }

    /// Records `key` for the current LED and advances.
    ///
    /// Returns `None` when calibration is already done.
    pub fn record(&mut self, key: KeyId) -> Option<RecordOutcome> {
        let CalibrationStep::Lighting(led) = self.step() else {
            return None;
        };
        self.next += 1;
        let outcome = match self.keymap.insert(key, led) {
            Some(previous) => RecordOutcome::Remapped { key, led, previous },
            None => RecordOutcome::Mapped { key, led },
        };
        Some(outcome)
    }

    /// Leaves the current LED unmapped and advances.
    pub fn skip(&mut self) -> Option<LedIndex> {
        let CalibrationStep::Lighting(led) = self.step() else {
            return None;
        };
        self.next += 1;
        self.skipped.push(led);
        Some(led)
    }

    /// LEDs whose wait window expired.
    pub fn skipped(&self) -> &[LedIndex] {
        &self.skipped
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn into_keymap(self) -> Keymap {
        self.keymap
    }
}

// ── Wizard ────────────────────────────────────────────────────────────────────

/// Settings the wizard is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSettings {
    pub prompt_color: Rgb,
    /// How long to wait for a key before skipping the LED.
    pub key_timeout: Duration,
}

impl CalibrationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            prompt_color: config.prompt_color,
            key_timeout: config.calibration_timeout(),
        }
    }
}

/// How a calibration run ended.
#[derive(Debug)]
pub enum CalibrationOutcome {
    /// All LEDs handled; the keymap has been saved.
    Completed {
        keymap: Keymap,
        skipped: Vec<LedIndex>,
        path: std::path::PathBuf,
    },
    /// Shutdown was requested; nothing was saved.
    Cancelled,
}

enum Wait {
    Key(KeyId),
    TimedOut,
    Cancelled,
    Closed,
}

/// Drives a [`Calibration`] against one keyboard.
pub struct CalibrationWizard {
    controller: Arc<dyn LedController>,
    settings: CalibrationSettings,
}

impl CalibrationWizard {
    pub fn new(controller: Arc<dyn LedController>, settings: CalibrationSettings) -> Self {
        Self { controller, settings }
    }

    /// Runs the whole procedure and saves the result to `store`.
    ///
    /// All LEDs are turned off when the run ends, however it ends.
    ///
    /// # Errors
    ///
    /// - [`CalibrationError::Sdk`] if the prompt cannot be shown.
    /// - [`CalibrationError::InputClosed`] if the key event stream ends.
    /// - [`CalibrationError::Store`] if the finished keymap cannot be saved.
    ///
    /// Nothing is saved on error or cancellation.
    pub async fn run(
        &self,
        events: &mut KeyEventReceiver,
        shutdown: &mut ShutdownSignal,
        store: &KeymapStore,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let device = self.controller.device_info().clone();
        let mut calibration = Calibration::new(device.led_count);

        self.controller.enable_direct_mode().await?;
        println!(
            "Calibrating {} {} ({} LEDs). Press each key as it lights up.",
            device.vendor, device.name, device.led_count
        );

        let result = self.walk(&mut calibration, events, shutdown).await;
        self.turn_off().await;

        match result? {
            Wait::Cancelled => {
                info!("calibration of {} cancelled; keymap left unchanged", device.name);
                return Ok(CalibrationOutcome::Cancelled);
            }
            Wait::Closed => return Err(CalibrationError::InputClosed),
            Wait::Key(_) | Wait::TimedOut => {}
        }

        let skipped = calibration.skipped().to_vec();
        let keymap = calibration.into_keymap();
        let path = store.save(&device.signature(), &keymap)?;
        println!(
            "Finished calibrating {}: {} keys mapped, {} LEDs unmapped.",
            device.name,
            keymap.len(),
            skipped.len()
        );
        Ok(CalibrationOutcome::Completed { keymap, skipped, path })
    }

    /// Steps through every LED.  Returns the last wait result; `Cancelled` or
    /// `Closed` mean the walk stopped early.
    async fn walk(
        &self,
        calibration: &mut Calibration,
        events: &mut KeyEventReceiver,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Wait, CalibrationError> {
        let total = calibration.led_count();
        let mut last = Wait::TimedOut;

        while let CalibrationStep::Lighting(led) = calibration.step() {
            events.drain();
            self.controller.fill(Rgb::BLACK).await?;
            self.controller
                .set_color(led, self.settings.prompt_color)
                .await?;
            println!("Press the key that is lit (LED {} of {total})", led.0 + 1);

            last = self.wait_for_key(events, shutdown).await;
            match last {
                Wait::Key(key) => match calibration.record(key) {
                    Some(RecordOutcome::Remapped { key, led, previous }) => {
                        warn!("{key} was already mapped to {previous}; remapped to {led}, {previous} is now unmapped");
                    }
                    Some(RecordOutcome::Mapped { key, led }) => info!("{key} → {led}"),
                    None => {}
                },
                Wait::TimedOut => {
                    calibration.skip();
                    warn!("no key pressed within {:?}; unmapped {led}", self.settings.key_timeout);
                }
                Wait::Cancelled | Wait::Closed => break,
            }
        }

        Ok(last)
    }

    async fn wait_for_key(&self, events: &mut KeyEventReceiver, shutdown: &mut ShutdownSignal) -> Wait {
        let deadline = time::Instant::now() + self.settings.key_timeout;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => return Wait::Cancelled,
                event = events.recv() => match event {
                    Some(event) if event.pressed => return Wait::Key(event.key),
                    Some(_) => continue,
                    None => return Wait::Closed,
                },
                _ = time::sleep_until(deadline) => return Wait::TimedOut,
            }
        }
    }

    async fn turn_off(&self) {
        if let Err(e) = self.controller.fill(Rgb::BLACK).await {
            warn!("could not turn LEDs off after calibration: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_walks_every_led() {
        // Arrange
        let mut cal = Calibration::new(3);

        // Act
        cal.record(KeyId(1));
        cal.record(KeyId(2));
        cal.record(KeyId(3));

        // Assert
        assert!(cal.is_done());
        assert_eq!(cal.keymap().led_for(KeyId(1)), Some(LedIndex(0)));
        assert_eq!(cal.keymap().led_for(KeyId(3)), Some(LedIndex(2)));
        assert_eq!(cal.record(KeyId(4)), None, "nothing to record once done");
    }

    #[test]
    fn test_skip_leaves_led_unmapped() {
        let mut cal = Calibration::new(3);
        cal.record(KeyId(1));
        assert_eq!(cal.skip(), Some(LedIndex(1)));
        cal.record(KeyId(3));

        assert_eq!(cal.skipped(), &[LedIndex(1)]);
        assert_eq!(cal.keymap().key_for(LedIndex(1)), None);
        assert_eq!(cal.keymap().len(), 2);
    }

    #[test]
    fn test_repeated_key_is_remapped_to_latest_led() {
        // Arrange
        let mut cal = Calibration::new(3);
        cal.record(KeyId(7));

        // Act
        let outcome = cal.record(KeyId(7));

        // Assert
        assert_eq!(
            outcome,
            Some(RecordOutcome::Remapped {
                key: KeyId(7),
                led: LedIndex(1),
                previous: LedIndex(0),
            })
        );
        assert_eq!(cal.keymap().led_for(KeyId(7)), Some(LedIndex(1)));
        assert_eq!(cal.keymap().key_for(LedIndex(0)), None);
    }

    #[test]
    fn test_zero_led_device_is_done_immediately() {
        let cal = Calibration::new(0);
        assert!(cal.is_done());
        assert!(cal.into_keymap().is_empty());
    }
}
