//! Composition root: wires config, SDK connector, input capture and keymap
//! storage together and implements the three top-level commands.
//!
//! # Startup sequence (for beginners)
//!
//! ```text
//! App::run()
//!  └─ list keyboards on the SDK server (retried with backoff)
//!  └─ for each keyboard, one after another:
//!       ├─ start capturing its key events
//!       └─ load its keymap ─┬─ found      → use it
//!                           └─ missing,   → run the calibration wizard,
//!                              mismatched    save the new keymap
//!                              or invalid
//!  └─ supervise until Ctrl-C:
//!       ├─ one DeviceSession task per keyboard
//!       ├─ every rescan interval, attach keyboards the server now reports
//!       │   that have no session (new, replugged, or whose session ended)
//!       └─ a session that found another device at its location
//!           → calibrate that device, then start a session for it
//! ```
//!
//! Calibration always finishes for every keyboard before any fade session
//! starts, so the wizard and the fade engine never drive the same LEDs.
//! Later calibrations only touch a keyboard that has no running session.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rgbfade_core::Keymap;
use tokio::task::{self, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::calibrate::{CalibrationOutcome, CalibrationSettings, CalibrationWizard};
use crate::application::retry::{retry_with_backoff, ConnectError};
use crate::application::session::{DeviceSession, SessionError, SessionSettings};
use crate::application::shutdown::{shutdown_channel, ShutdownSignal};
use crate::error::FatalError;
use crate::infrastructure::input_capture::hidraw::HidrawInputFactory;
use crate::infrastructure::input_capture::{
    stop_source, CaptureError, InputSource, InputSourceFactory, KeyEventReceiver,
};
use crate::infrastructure::lighting::openrgb::OpenRgbConnector;
use crate::infrastructure::lighting::{DeviceConnector, DeviceInfo, LedController};
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::keymap_store::{KeymapStore, KeymapStoreError};

// ── Device listing ────────────────────────────────────────────────────────────

/// State of the stored keymap for one keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeymapStatus {
    Calibrated { keys: usize },
    Missing,
    /// A keymap exists but was recorded for a different device.
    Mismatch,
    Invalid(String),
}

impl fmt::Display for KeymapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibrated { keys } => write!(f, "calibrated ({keys} keys)"),
            Self::Missing => write!(f, "not calibrated"),
            Self::Mismatch => write!(f, "keymap is for another device"),
            Self::Invalid(reason) => write!(f, "keymap invalid: {reason}"),
        }
    }
}

/// One row of `rgbfade devices`.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub device: DeviceInfo,
    pub keymap: KeymapStatus,
}

/// A keyboard whose input is capturing and whose keymap is ready.
struct PreparedKeyboard {
    device: DeviceInfo,
    keymap: Keymap,
    source: Box<dyn InputSource>,
    events: KeyEventReceiver,
}

/// Result of getting one keyboard ready to fade.
enum Attach {
    Ready(PreparedKeyboard),
    /// Key capture could not start.
    Unavailable { device: DeviceInfo, error: CaptureError },
    /// Shutdown arrived during calibration; nothing was saved.
    Cancelled,
}

async fn release(prepared: Vec<PreparedKeyboard>) {
    for keyboard in prepared {
        stop_source(keyboard.source).await;
    }
}

// ── Running sessions ──────────────────────────────────────────────────────────

/// The fade sessions currently running, one per keyboard location.
struct Sessions {
    tasks: JoinSet<Result<(), SessionError>>,
    locations: HashMap<task::Id, String>,
    settings: SessionSettings,
    shutdown: ShutdownSignal,
}

impl Sessions {
    fn new(settings: SessionSettings, shutdown: ShutdownSignal) -> Self {
        Self {
            tasks: JoinSet::new(),
            locations: HashMap::new(),
            settings,
            shutdown,
        }
    }

    fn is_running(&self, location: &str) -> bool {
        self.locations.values().any(|l| l == location)
    }

    fn spawn(&mut self, connector: &Arc<dyn DeviceConnector>, keyboard: PreparedKeyboard) {
        let PreparedKeyboard {
            device,
            keymap,
            source,
            events,
        } = keyboard;
        let session = DeviceSession::new(
            Arc::clone(connector),
            device.location.clone(),
            device.signature(),
            keymap,
            self.settings,
        );
        let shutdown = self.shutdown.clone();
        let handle = self.tasks.spawn(async move {
            let result = session.run(events, shutdown).await;
            stop_source(source).await;
            result
        });
        self.locations.insert(handle.id(), device.location);
    }

    /// Waits for the next session to end.  `None` when none is running.
    async fn join_next(&mut self) -> Option<(String, Result<(), SessionError>)> {
        loop {
            match self.tasks.join_next_with_id().await? {
                Ok((id, result)) => {
                    let location = self.locations.remove(&id).unwrap_or_default();
                    return Some((location, result));
                }
                Err(e) => {
                    self.locations.remove(&e.id());
                    error!("session task failed: {e}");
                }
            }
        }
    }

    async fn wait_all(mut self) {
        while let Some((location, result)) = self.join_next().await {
            if let Err(e) = result {
                warn!("session for {location} ended during shutdown: {e}");
            }
        }
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

pub struct App {
    config: AppConfig,
    connector: Arc<dyn DeviceConnector>,
    inputs: Arc<dyn InputSourceFactory>,
    store: KeymapStore,
}

impl App {
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn DeviceConnector>,
        inputs: Arc<dyn InputSourceFactory>,
        store: KeymapStore,
    ) -> Self {
        Self {
            config,
            connector,
            inputs,
            store,
        }
    }

    /// Production wiring: OpenRGB over TCP, hidraw input, keymaps next to
    /// the config file.
    pub fn with_openrgb(config: AppConfig, config_dir: &Path) -> Self {
        let connector = OpenRgbConnector::new(
            config.sdk_host.clone(),
            config.sdk_port,
            config.client_name.clone(),
            config.push_timeout(),
        );
        let store = KeymapStore::in_config_dir(config_dir);
        Self::new(config, Arc::new(connector), Arc::new(HidrawInputFactory), store)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &KeymapStore {
        &self.store
    }

    /// Calibrates keyboards that need it, then fades every keyboard until
    /// shutdown, attaching keyboards that show up or come back meanwhile.
    ///
    /// # Errors
    ///
    /// Returns a [`FatalError`] when the SDK server is unreachable at startup,
    /// no keyboard can be attached at startup, or a keymap cannot be read or
    /// written.  A session that ends while running is re-attached instead.
    /// Ctrl-C is not an error.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), FatalError> {
        let Some(keyboards) = self.list_keyboards(&mut shutdown).await? else {
            return Ok(());
        };
        if keyboards.is_empty() {
            return Err(FatalError::NoKeyboard(
                "the SDK server reports no keyboards".to_string(),
            ));
        }

        let mut prepared = Vec::with_capacity(keyboards.len());
        for device in keyboards {
            match self.prepare(device, &mut shutdown).await {
                Ok(Attach::Ready(keyboard)) => prepared.push(keyboard),
                Ok(Attach::Unavailable { device, error }) => {
                    error!("skipping {} at {}: {error}", device.name, device.location);
                }
                Ok(Attach::Cancelled) => {
                    release(prepared).await;
                    return Ok(());
                }
                Err(e) => {
                    release(prepared).await;
                    return Err(e);
                }
            }
        }

        if prepared.is_empty() {
            return Err(FatalError::NoKeyboard(
                "key capture failed for every keyboard".to_string(),
            ));
        }
        self.supervise(prepared, shutdown).await
    }

    /// Re-calibrates the keyboard at `location`, replacing its keymap.
    ///
    /// # Errors
    ///
    /// [`FatalError::UnknownDevice`] if the SDK server has no keyboard there,
    /// otherwise the errors of calibration itself.
    pub async fn setup(&self, location: &str, mut shutdown: ShutdownSignal) -> Result<(), FatalError> {
        let Some(keyboards) = self.list_keyboards(&mut shutdown).await? else {
            return Ok(());
        };
        let Some(device) = keyboards.into_iter().find(|k| k.location == location) else {
            return Err(FatalError::UnknownDevice {
                location: location.to_string(),
            });
        };

        let source = self.inputs.open(location);
        let mut events = source.start()?;
        let result = self.calibrate(&device, &mut events, &mut shutdown).await;
        stop_source(source).await;
        result.map(|_| ())
    }

    /// Lists the keyboards the SDK server reports, with their keymap status.
    pub async fn devices(&self, mut shutdown: ShutdownSignal) -> Result<Vec<DeviceStatus>, FatalError> {
        let keyboards = self.list_keyboards(&mut shutdown).await?.unwrap_or_default();
        Ok(keyboards
            .into_iter()
            .map(|device| {
                let keymap = self.keymap_status(&device);
                DeviceStatus { device, keymap }
            })
            .collect())
    }

    fn keymap_status(&self, device: &DeviceInfo) -> KeymapStatus {
        match self.store.load(&device.signature()) {
            Ok(keymap) => KeymapStatus::Calibrated { keys: keymap.len() },
            Err(KeymapStoreError::NotFound { .. }) => KeymapStatus::Missing,
            Err(KeymapStoreError::DeviceMismatch { .. }) => KeymapStatus::Mismatch,
            Err(e) => KeymapStatus::Invalid(e.to_string()),
        }
    }

    /// `None` when shutdown interrupted the attempts.
    async fn list_keyboards(
        &self,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Option<Vec<DeviceInfo>>, FatalError> {
        let connector = Arc::clone(&self.connector);
        let listed = retry_with_backoff(
            "listing keyboards",
            self.config.connect_attempts,
            shutdown,
            || {
                let connector = Arc::clone(&connector);
                async move { connector.list_keyboards().await }
            },
        )
        .await;

        match listed {
            Ok(keyboards) => Ok(Some(keyboards)),
            Err(ConnectError::Cancelled) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(
        &self,
        location: &str,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Option<Arc<dyn LedController>>, FatalError> {
        let what = format!("connecting to {location}");
        let connected = retry_with_backoff(&what, self.config.connect_attempts, shutdown, || {
            let connector = Arc::clone(&self.connector);
            let location = location.to_string();
            async move { connector.connect(&location).await }
        })
        .await;

        match connected {
            Ok(controller) => Ok(Some(controller)),
            Err(ConnectError::Cancelled) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the wizard for `device` on its own connection.  `None` means the
    /// run was cancelled and nothing was saved.
    async fn calibrate(
        &self,
        device: &DeviceInfo,
        events: &mut KeyEventReceiver,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Option<Keymap>, FatalError> {
        let Some(controller) = self.connect(&device.location, shutdown).await? else {
            return Ok(None);
        };

        let settings = CalibrationSettings::from_config(&self.config);
        let wizard = CalibrationWizard::new(Arc::clone(&controller), settings);
        let outcome = wizard.run(events, shutdown, &self.store).await;
        controller.disconnect().await;

        match outcome? {
            CalibrationOutcome::Completed {
                keymap,
                skipped,
                path,
            } => {
                if !skipped.is_empty() {
                    warn!("{} LEDs of {} were left unmapped", skipped.len(), device.name);
                }
                info!("saved keymap for {} to {}", device.name, path.display());
                Ok(Some(keymap))
            }
            CalibrationOutcome::Cancelled => Ok(None),
        }
    }

    /// Starts capture and loads or learns the keymap for `device`.
    async fn prepare(
        &self,
        device: DeviceInfo,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Attach, FatalError> {
        let source = self.inputs.open(&device.location);
        let mut events = match source.start() {
            Ok(events) => events,
            Err(error) => return Ok(Attach::Unavailable { device, error }),
        };

        let keymap = match self.store.load(&device.signature()) {
            Ok(keymap) => keymap,
            Err(e) if e.needs_calibration() => {
                info!("{}: {e}; calibrating", device.name);
                match self.calibrate(&device, &mut events, shutdown).await {
                    Ok(Some(keymap)) => keymap,
                    Ok(None) => {
                        stop_source(source).await;
                        return Ok(Attach::Cancelled);
                    }
                    Err(e) => {
                        stop_source(source).await;
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                stop_source(source).await;
                return Err(e.into());
            }
        };

        Ok(Attach::Ready(PreparedKeyboard {
            device,
            keymap,
            source,
            events,
        }))
    }

    /// Runs the fade sessions until shutdown or a fatal error, then stops
    /// every session and waits for its LEDs to go dark.
    async fn supervise(
        &self,
        prepared: Vec<PreparedKeyboard>,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), FatalError> {
        let (stop_sessions, session_shutdown) = shutdown_channel();
        let settings = SessionSettings::from_config(&self.config);
        let mut sessions = Sessions::new(settings, session_shutdown);
        for keyboard in prepared {
            sessions.spawn(&self.connector, keyboard);
        }

        let period = self.config.rescan_interval();
        let mut rescan = time::interval_at(time::Instant::now() + period, period);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unavailable = HashSet::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break Ok(()),
                Some((location, result)) = sessions.join_next() => {
                    let Some(device) = session_ended(&location, result) else {
                        continue;
                    };
                    if let Err(e) = self
                        .attach(device, &mut shutdown, &mut sessions, &mut unavailable)
                        .await
                    {
                        break Err(e);
                    }
                }
                _ = rescan.tick() => {
                    let scanned = self.rescan(&mut shutdown, &mut sessions, &mut unavailable).await;
                    if let Err(e) = scanned {
                        break Err(e);
                    }
                }
            }
        };

        stop_sessions.trigger();
        sessions.wait_all().await;
        result
    }

    /// Attaches every reported keyboard that has no running session.
    async fn rescan(
        &self,
        shutdown: &mut ShutdownSignal,
        sessions: &mut Sessions,
        unavailable: &mut HashSet<String>,
    ) -> Result<(), FatalError> {
        let keyboards = match self.connector.list_keyboards().await {
            Ok(keyboards) => keyboards,
            Err(e) => {
                debug!("rescanning keyboards failed: {e}");
                return Ok(());
            }
        };
        for device in keyboards {
            if shutdown.is_triggered() {
                break;
            }
            if !sessions.is_running(&device.location) {
                self.attach(device, shutdown, sessions, unavailable).await?;
            }
        }
        Ok(())
    }

    /// Prepares `device` and starts its session.  A keyboard whose capture
    /// cannot start is warned about once and retried on later scans.
    async fn attach(
        &self,
        device: DeviceInfo,
        shutdown: &mut ShutdownSignal,
        sessions: &mut Sessions,
        unavailable: &mut HashSet<String>,
    ) -> Result<(), FatalError> {
        match self.prepare(device, shutdown).await? {
            Attach::Ready(keyboard) => {
                unavailable.remove(&keyboard.device.location);
                info!(
                    "attaching {} at {}",
                    keyboard.device.name, keyboard.device.location
                );
                sessions.spawn(&self.connector, keyboard);
            }
            Attach::Unavailable { device, error } => {
                if unavailable.insert(device.location.clone()) {
                    warn!("cannot capture keys of {} at {}: {error}", device.name, device.location);
                } else {
                    debug!("{} at {} is still unavailable: {error}", device.name, device.location);
                }
            }
            Attach::Cancelled => {}
        }
        Ok(())
    }
}

/// Logs why a session ended.  Returns the device to calibrate when another
/// keyboard took the session's place.
fn session_ended(location: &str, result: Result<(), SessionError>) -> Option<DeviceInfo> {
    match result {
        Ok(()) => {
            debug!("session for {location} ended");
            None
        }
        Err(SessionError::DeviceMismatch { found, .. }) => {
            warn!("{location} is now {}; calibrating it", found.signature());
            Some(found)
        }
        Err(e) => {
            warn!("{e}; {location} is re-attached once the SDK server reports it");
            None
        }
    }
}
