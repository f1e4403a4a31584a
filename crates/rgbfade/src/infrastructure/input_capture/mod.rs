//! Keyboard input capture.
//!
//! Each keyboard is read on a dedicated OS thread that blocks on HID report
//! delivery.  Decoded key events are handed to the async side through a
//! bounded channel.
//!
//! # Backpressure
//!
//! The channel holds [`EVENT_CHANNEL_CAPACITY`] events.  When the consumer
//! falls behind, the *oldest* pending events are overwritten so the reader
//! thread never blocks.  The receiver notices the gap, logs how many events
//! were lost and carries on with the newest ones.
//!
//! # Testability
//!
//! The [`InputSource`] trait lets tests inject synthetic events through
//! [`mock::MockInputSource`] without any HID hardware.

use std::time::Instant;

use rgbfade_core::KeyId;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

pub mod hidraw;
pub mod mock;

/// Number of key events buffered between the reader thread and the session.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A key press or release read from a keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyId,
    pub pressed: bool,
    /// When the report was read; used as the fade's `lit_at`.
    pub at: Instant,
}

impl KeyEvent {
    pub fn press(key: KeyId, at: Instant) -> Self {
        Self { key, pressed: true, at }
    }

    pub fn release(key: KeyId, at: Instant) -> Self {
        Self { key, pressed: false, at }
    }
}

/// Error type for input capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to initialise hidapi: {0}")]
    HidApi(String),
    #[error("failed to open keyboard input at {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("input source has already been started")]
    AlreadyStarted,
    #[error("keyboard input stream closed")]
    Closed,
}

/// Creates a connected sender/receiver pair with drop-oldest semantics.
pub fn key_event_channel() -> (KeyEventSender, KeyEventReceiver) {
    let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    (KeyEventSender { tx }, KeyEventReceiver { rx, dropped: 0 })
}

/// Producer half of the key event channel.  Never blocks.
#[derive(Debug, Clone)]
pub struct KeyEventSender {
    tx: broadcast::Sender<KeyEvent>,
}

impl KeyEventSender {
    /// Queues `event`, overwriting the oldest pending event when full.
    ///
    /// Returns `false` once the receiver has been dropped.
    pub fn send(&self, event: KeyEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer half of the key event channel.
#[derive(Debug)]
pub struct KeyEventReceiver {
    rx: broadcast::Receiver<KeyEvent>,
    dropped: u64,
}

impl KeyEventReceiver {
    /// Waits for the next event.
    ///
    /// Returns `None` once every sender is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<KeyEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.note_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns a buffered event without waiting, if one is available.
    pub fn try_recv(&mut self) -> Option<KeyEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Discards every buffered event and returns how many were discarded.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.try_recv().is_some() {
            count += 1;
        }
        count
    }

    /// Total number of events overwritten before they could be read.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn note_lag(&mut self, n: u64) {
        self.dropped += n;
        warn!("key event consumer fell behind; dropped {n} oldest events");
    }
}

/// Trait abstracting key event production.
///
/// The production implementation reads hidraw reports; tests use
/// [`mock::MockInputSource`].
pub trait InputSource: Send {
    /// Starts capturing and returns the receiving end of the event channel.
    fn start(&self) -> Result<KeyEventReceiver, CaptureError>;
    /// Stops capturing and releases OS resources.  The receiver then yields
    /// `None` once drained.
    fn stop(&self);
}

/// Opens an [`InputSource`] for a keyboard, given its SDK location.
pub trait InputSourceFactory: Send + Sync {
    fn open(&self, location: &str) -> Box<dyn InputSource>;
}

/// Stops `source` on the blocking thread pool.
///
/// [`InputSource::stop`] joins the reader thread, which can take up to one
/// HID read timeout; async callers go through here instead.
pub async fn stop_source(source: Box<dyn InputSource>) {
    if let Err(e) = tokio::task::spawn_blocking(move || source.stop()).await {
        warn!("stopping key capture failed: {e}");
    }
}
