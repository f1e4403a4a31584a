//! hidraw keyboard reader built on `hidapi`.
//!
//! The OpenRGB SDK reports a keyboard's location as `"HID: /dev/hidrawN"`.
//! That node also delivers the keyboard's input reports, so the same path is
//! opened here and read on a dedicated thread.
//!
//! # Report layout
//!
//! ```text
//! byte:  0   1   2      3      4
//!        ?   ?   key_lo key_hi state
//! ```
//!
//! The key id is bytes `[2..4]` little-endian.  A report with `state > 0` is a
//! press; a report that stops after the key bytes is a release.  Anything
//! shorter than four bytes carries no key and is ignored.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use hidapi::{HidApi, HidDevice};
use rgbfade_core::KeyId;
use tracing::{debug, error, info};

use super::{
    key_event_channel, CaptureError, InputSource, InputSourceFactory, KeyEvent, KeyEventReceiver,
    KeyEventSender,
};

/// Prefix OpenRGB puts in front of hidraw device paths.
const LOCATION_PREFIX: &str = "HID: ";

/// Size of the report buffer; keyboard reports are far smaller.
const REPORT_BUFFER_SIZE: usize = 256;

/// Poll interval of the reader thread, so `stop()` is noticed promptly.
const READ_TIMEOUT_MS: i32 = 100;

/// Converts an SDK device location into a hidraw path.
pub fn hidraw_path(location: &str) -> &str {
    location.strip_prefix(LOCATION_PREFIX).unwrap_or(location).trim()
}

/// Decodes one input report into `(key, pressed)`.
///
/// Returns `None` for reports too short to carry a key.
pub fn decode_report(report: &[u8]) -> Option<(KeyId, bool)> {
    if report.len() < 4 {
        return None;
    }
    let key = KeyId(u16::from_le_bytes([report[2], report[3]]));
    let pressed = report.get(4).is_some_and(|&state| state > 0);
    Some((key, pressed))
}

/// [`InputSource`] reading a keyboard's hidraw node.
pub struct HidrawInputSource {
    path: String,
    shutdown: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HidrawInputSource {
    /// Creates a source for the keyboard at SDK `location`.
    pub fn new(location: &str) -> Self {
        Self {
            path: hidraw_path(location).to_string(),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open(&self) -> Result<HidDevice, CaptureError> {
        let api = HidApi::new().map_err(|e| CaptureError::HidApi(e.to_string()))?;
        let c_path = CString::new(self.path.as_str()).map_err(|e| CaptureError::OpenFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        api.open_path(&c_path).map_err(|e| CaptureError::OpenFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

impl InputSource for HidrawInputSource {
    fn start(&self) -> Result<KeyEventReceiver, CaptureError> {
        let mut reader = self.reader.lock().map_err(|_| CaptureError::Closed)?;
        if reader.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        let device = self.open()?;
        let (tx, rx) = key_event_channel();
        let shutdown = Arc::clone(&self.shutdown);
        shutdown.store(false, Ordering::Relaxed);
        let path = self.path.clone();

        let handle = std::thread::Builder::new()
            .name("hid-event-reader".into())
            .spawn(move || run_reader_loop(device, tx, shutdown, &path))
            .map_err(|e| CaptureError::OpenFailed {
                path: self.path.clone(),
                reason: format!("could not spawn reader thread: {e}"),
            })?;
        *reader = Some(handle);

        info!("capturing key events from {}", self.path);
        Ok(rx)
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("HID reader thread for {} panicked", self.path);
            }
        }
    }
}

impl Drop for HidrawInputSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Factory producing a [`HidrawInputSource`] per keyboard.
#[derive(Debug, Default, Clone, Copy)]
pub struct HidrawInputFactory;

impl InputSourceFactory for HidrawInputFactory {
    fn open(&self, location: &str) -> Box<dyn InputSource> {
        Box::new(HidrawInputSource::new(location))
    }
}

/// Blocking read loop; exits on shutdown, read error, or a dropped receiver.
fn run_reader_loop(device: HidDevice, tx: KeyEventSender, shutdown: Arc<AtomicBool>, path: &str) {
    let mut buf = [0u8; REPORT_BUFFER_SIZE];
    while !shutdown.load(Ordering::Relaxed) {
        match device.read_timeout(&mut buf, READ_TIMEOUT_MS) {
            Ok(0) => continue,
            Ok(len) => {
                let Some((key, pressed)) = decode_report(&buf[..len]) else {
                    debug!("ignoring {len}-byte report from {path}");
                    continue;
                };
                let event = KeyEvent {
                    key,
                    pressed,
                    at: Instant::now(),
                };
                if !tx.send(event) {
                    debug!("key event receiver for {path} dropped; stopping reader");
                    return;
                }
            }
            Err(e) => {
                error!("reading {path} failed: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidraw_path_strips_sdk_prefix() {
        assert_eq!(hidraw_path("HID: /dev/hidraw3"), "/dev/hidraw3");
        assert_eq!(hidraw_path("/dev/hidraw1"), "/dev/hidraw1");
    }

    #[test]
    fn test_decode_report_press() {
        // Arrange
        let report = [0x03, 0x00, 0x29, 0x01, 0x01];

        // Act
        let decoded = decode_report(&report);

        // Assert
        assert_eq!(decoded, Some((KeyId(0x0129), true)));
    }

    #[test]
    fn test_decode_report_zero_state_is_release() {
        assert_eq!(decode_report(&[3, 0, 0x29, 0, 0]), Some((KeyId(0x29), false)));
    }

    #[test]
    fn test_decode_report_without_state_byte_is_release() {
        assert_eq!(decode_report(&[3, 0, 0x29, 0]), Some((KeyId(0x29), false)));
    }

    #[test]
    fn test_decode_report_ignores_short_reports() {
        assert_eq!(decode_report(&[]), None);
        assert_eq!(decode_report(&[3, 0, 0x29]), None);
    }

    #[test]
    fn test_source_keeps_stripped_path() {
        let source = HidrawInputSource::new("HID: /dev/hidraw7");
        assert_eq!(source.path(), "/dev/hidraw7");
    }
}
