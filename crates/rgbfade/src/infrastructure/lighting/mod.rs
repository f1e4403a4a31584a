//! Lighting infrastructure: the seam between rgbfade and the LEDs.
//!
//! # Sub-modules
//!
//! - **`openrgb`** – Adapter over the `openrgb2` SDK client.  One connection
//!   is opened per keyboard so that a stalled push on one device never delays
//!   another.
//!
//! - **`mock`** – In-memory [`LedController`] that records every push and can
//!   be told to fail, used by the application-layer tests.
//!
//! The application layer only sees the [`LedController`] and
//! [`DeviceConnector`] traits, injected as `Arc<dyn …>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openrgb2::OpenRgbError;
use rgbfade_core::{DeviceSignature, LedIndex, Rgb};
use thiserror::Error;

pub mod mock;
pub mod openrgb;

/// Errors raised while talking to the lighting SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Connecting to the SDK server failed.
    #[error("failed to connect to OpenRGB SDK server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: OpenRgbError,
    },
    /// The server did not answer or accept a write in time.
    #[error("SDK request timed out after {0:?}")]
    Timeout(Duration),
    /// A request on an established connection failed.
    #[error("SDK request failed: {0}")]
    Request(#[from] OpenRgbError),
    /// The connection was closed or is known to be broken.
    #[error("SDK connection is closed")]
    Disconnected,
    /// No keyboard is reported at the requested location.
    #[error("no keyboard found at {0}")]
    DeviceNotFound(String),
    /// A push addressed an LED the device does not have.
    #[error("{led} is out of range for a device with {led_count} LEDs")]
    LedOutOfRange { led: LedIndex, led_count: u32 },
}

/// What the SDK reports about one keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    /// Device location, e.g. `"HID: /dev/hidraw3"`.
    pub location: String,
    pub led_count: u32,
}

impl DeviceInfo {
    /// Identity used to select and validate the stored keymap.
    pub fn signature(&self) -> DeviceSignature {
        DeviceSignature::new(self.vendor.clone(), self.name.clone(), self.led_count)
    }
}

/// Per-LED control of one keyboard.
///
/// Implementations must bound every call with a timeout so the caller's tick
/// loop never stalls.
#[async_trait]
pub trait LedController: Send + Sync {
    /// The device this controller drives, as reported when it was attached.
    fn device_info(&self) -> &DeviceInfo;

    /// Sets a single LED.
    async fn set_color(&self, led: LedIndex, color: Rgb) -> Result<(), SdkError>;

    /// Sets every LED of the device to `color`.
    async fn fill(&self, color: Rgb) -> Result<(), SdkError>;

    /// Switches the device into direct (custom) mode so per-LED colors stick.
    async fn enable_direct_mode(&self) -> Result<(), SdkError>;

    /// Closes the connection.  Later calls fail with [`SdkError::Disconnected`].
    async fn disconnect(&self);
}

/// Opens SDK connections.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Lists the keyboards the SDK server currently reports.
    async fn list_keyboards(&self) -> Result<Vec<DeviceInfo>, SdkError>;

    /// Opens a dedicated connection bound to the keyboard at `location`.
    async fn connect(&self, location: &str) -> Result<Arc<dyn LedController>, SdkError>;
}
