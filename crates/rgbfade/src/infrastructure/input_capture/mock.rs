//! Mock input source for unit testing.
//!
//! Allows tests to inject synthetic [`KeyEvent`]s without a keyboard attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rgbfade_core::KeyId;

use super::{
    key_event_channel, CaptureError, InputSource, InputSourceFactory, KeyEvent, KeyEventReceiver,
    KeyEventSender,
};

/// A mock implementation of [`InputSource`] that allows tests to inject events.
///
/// Clones share the same channel, so a test can keep one handle while the
/// code under test owns another.
#[derive(Default, Clone)]
pub struct MockInputSource {
    sender: Arc<Mutex<Option<KeyEventSender>>>,
}

impl MockInputSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a synthetic event, as if read from hardware.
    ///
    /// Panics if `start()` has not been called or if `stop()` has been called.
    pub fn inject_event(&self, event: KeyEvent) {
        let guard = self.sender.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(sender) => {
                sender.send(event);
            }
            None => panic!("MockInputSource::inject_event called before start()"),
        }
    }

    /// Injects a key press stamped with the current time.
    ///
    /// The stamp comes from tokio's clock, so tests running with paused time
    /// see presses at the paused instant.
    pub fn press(&self, key: KeyId) {
        self.inject_event(KeyEvent::press(key, now()));
    }

    /// Injects a key release stamped with the current time.
    pub fn release(&self, key: KeyId) {
        self.inject_event(KeyEvent::release(key, now()));
    }

    pub fn is_started(&self) -> bool {
        self.sender.lock().expect("lock poisoned").is_some()
    }

    /// A clone of the live sender, for wiring into other test doubles.
    pub fn sender(&self) -> Option<KeyEventSender> {
        self.sender.lock().expect("lock poisoned").clone()
    }
}

impl InputSource for MockInputSource {
    fn start(&self) -> Result<KeyEventReceiver, CaptureError> {
        let mut guard = self.sender.lock().expect("lock poisoned");
        if guard.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        let (tx, rx) = key_event_channel();
        *guard = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        // Drop the sender to close the channel
        *self.sender.lock().expect("lock poisoned") = None;
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// Hands out one shared [`MockInputSource`] per location.
#[derive(Default)]
pub struct MockInputFactory {
    sources: Mutex<HashMap<String, MockInputSource>>,
}

impl MockInputFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The source for `location`, created on first use.
    pub fn source(&self, location: &str) -> MockInputSource {
        self.sources
            .lock()
            .expect("lock poisoned")
            .entry(location.to_string())
            .or_default()
            .clone()
    }
}

impl InputSourceFactory for MockInputFactory {
    fn open(&self, location: &str) -> Box<dyn InputSource> {
        Box::new(self.source(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_input_source_starts_and_receives_events() {
        // Arrange
        let source = MockInputSource::new();
        let mut rx = source.start().expect("start should succeed");

        // Act
        source.press(KeyId(0x29));
        source.release(KeyId(0x29));

        // Assert
        let down = rx.recv().await.expect("press");
        assert_eq!(down.key, KeyId(0x29));
        assert!(down.pressed);
        let up = rx.recv().await.expect("release");
        assert!(!up.pressed);
    }

    #[tokio::test]
    async fn test_mock_input_source_stop_closes_channel() {
        // Arrange
        let source = MockInputSource::new();
        let mut rx = source.start().expect("start should succeed");

        // Act
        source.stop();

        // Assert – channel should be closed after stop()
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_mock_input_source_rejects_second_start() {
        let source = MockInputSource::new();
        let _rx = source.start().expect("first start");
        assert!(matches!(source.start(), Err(CaptureError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_factory_shares_source_per_location() {
        // Arrange
        let factory = MockInputFactory::new();
        let handle = factory.source("HID: /dev/hidraw0");

        // Act
        let opened = factory.open("HID: /dev/hidraw0");
        let mut rx = opened.start().expect("start");
        handle.press(KeyId(4));

        // Assert
        assert!(handle.is_started());
        assert_eq!(rx.recv().await.map(|e| e.key), Some(KeyId(4)));
        assert!(!factory.source("HID: /dev/hidraw1").is_started());
    }

    #[test]
    #[should_panic(expected = "before start")]
    fn test_inject_before_start_panics() {
        MockInputSource::new().press(KeyId(1));
    }
}
