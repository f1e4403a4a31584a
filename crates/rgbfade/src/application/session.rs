//! DeviceSession: runs the fade effect on one calibrated keyboard.
//!
//! Each keyboard gets its own session task with its own SDK connection.  The
//! session is a single `select!` loop, so the engine's fade states are only
//! ever touched from one place:
//!
//! ```text
//! loop {
//!     shutdown    → engine.shutdown(), return
//!     key event   → engine.handle_event()
//!     tick        → engine.tick(now)
//!                     └─ connection lost → reconnect, fresh engine
//! }
//! ```
//!
//! A session never calibrates.  When a reconnect finds another device at its
//! location it ends with [`SessionError::DeviceMismatch`] and `App` takes
//! the new device through calibration.

use std::sync::Arc;
use std::time::Duration;

use rgbfade_core::{DeviceSignature, Keymap, Rgb};
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use super::fade_engine::{FadeEngine, FadeSettings};
use super::retry::{retry_with_backoff, ConnectError};
use super::shutdown::ShutdownSignal;
use crate::infrastructure::input_capture::KeyEventReceiver;
use crate::infrastructure::lighting::{DeviceConnector, DeviceInfo, LedController};
use crate::infrastructure::storage::config::AppConfig;

/// Error type for a device session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The SDK server could not be reached (initially or after a loss).
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The device at this location is no longer the one the keymap is for.
    #[error("device at {location} changed from {expected} to {}", .found.signature())]
    DeviceMismatch {
        location: String,
        expected: DeviceSignature,
        /// The device now attached, as reported by the SDK.
        found: DeviceInfo,
    },
    /// The keyboard's input stream ended.
    #[error("keyboard input for {location} closed")]
    InputClosed { location: String },
}

/// Settings a session is constructed with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub tick_interval: Duration,
    pub connect_attempts: u32,
    pub fade: FadeSettings,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            connect_attempts: config.connect_attempts,
            fade: FadeSettings::from_config(config),
        }
    }
}

/// The fade loop for one keyboard.
pub struct DeviceSession {
    connector: Arc<dyn DeviceConnector>,
    location: String,
    signature: DeviceSignature,
    keymap: Keymap,
    settings: SessionSettings,
}

impl DeviceSession {
    /// `signature` is the device the keymap was recorded for; every
    /// (re)connect verifies the live device still matches it.
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        location: impl Into<String>,
        signature: DeviceSignature,
        keymap: Keymap,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            location: location.into(),
            signature,
            keymap,
            settings,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Runs until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Connect`] when (re)connecting is exhausted.
    /// - [`SessionError::DeviceMismatch`] when the device changed; it carries
    ///   the new device so the caller can calibrate it.
    /// - [`SessionError::InputClosed`] when the keyboard input stream ends.
    pub async fn run(
        self,
        mut events: KeyEventReceiver,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), SessionError> {
        let Some(mut engine) = self.attach(&mut shutdown).await? else {
            return Ok(());
        };
        info!(
            "fading {} keys on {} at {}",
            self.keymap.len(),
            self.signature,
            self.location
        );

        let mut ticker = time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    engine.shutdown().await;
                    info!("session for {} stopped", self.location);
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(event) => engine.handle_event(event),
                    None => {
                        engine.shutdown().await;
                        return Err(SessionError::InputClosed {
                            location: self.location.clone(),
                        });
                    }
                },
                _ = ticker.tick() => {
                    let now = time::Instant::now().into_std();
                    if let Err(e) = engine.tick(now).await {
                        error!("{}: {e}; reconnecting", self.location);
                        engine.controller().disconnect().await;
                        match self.attach(&mut shutdown).await? {
                            Some(fresh) => engine = fresh,
                            None => return Ok(()),
                        }
                        let stale = events.drain();
                        if stale > 0 {
                            info!("discarded {stale} key events received while reconnecting");
                        }
                        ticker.reset();
                    }
                }
            }
        }
    }

    /// Connects, enables direct mode and clears the LEDs, then builds a fresh
    /// engine.  Returns `None` if shutdown was requested meanwhile.
    async fn attach(&self, shutdown: &mut ShutdownSignal) -> Result<Option<FadeEngine>, SessionError> {
        let what = format!("connecting to {}", self.location);
        let connected = retry_with_backoff(&what, self.settings.connect_attempts, shutdown, || {
            let connector = Arc::clone(&self.connector);
            let location = self.location.clone();
            async move {
                let controller: Arc<dyn LedController> = connector.connect(&location).await?;
                controller.enable_direct_mode().await?;
                controller.fill(Rgb::BLACK).await?;
                Ok(controller)
            }
        })
        .await;

        let controller = match connected {
            Ok(controller) => controller,
            Err(ConnectError::Cancelled) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let found = controller.device_info().clone();
        if found.signature() != self.signature {
            warn!(
                "device at {} is now {}, expected {}",
                self.location,
                found.signature(),
                self.signature
            );
            controller.disconnect().await;
            return Err(SessionError::DeviceMismatch {
                location: self.location.clone(),
                expected: self.signature.clone(),
                found,
            });
        }

        Ok(Some(FadeEngine::new(
            controller,
            self.keymap.clone(),
            self.settings.fade,
        )))
    }
}
