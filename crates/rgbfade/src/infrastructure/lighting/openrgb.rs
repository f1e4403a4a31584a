//! OpenRGB SDK adapter built on the `openrgb2` client.
//!
//! # Connection lifecycle
//!
//! ```text
//! OpenRgbClient::connect_to ─► set_name ─► get_controllers_of_type(Keyboard)
//!                                              └─ pick the one at `location`
//!                                                   └─ init / cmd().set_led …
//! ```
//!
//! Every call into `openrgb2` is bounded by the configured timeout.  After any
//! error or timeout the device drops its connection and all later calls fail
//! fast with [`SdkError::Disconnected`]; recovering means connecting again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openrgb2::{Color, Controller, DeviceType, OpenRgbClient, OpenRgbResult};
use rgbfade_core::{LedIndex, Rgb};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info};

use super::{DeviceConnector, DeviceInfo, LedController, SdkError};

/// SDK protocol version requested from the server.
const SDK_PROTOCOL_VERSION: u32 = 5;

fn to_sdk_color(color: Rgb) -> Color {
    Color::new(color.r, color.g, color.b)
}

fn device_info(controller: &Controller) -> DeviceInfo {
    DeviceInfo {
        name: controller.name().to_string(),
        vendor: controller.vendor().to_string(),
        location: controller.location().to_string(),
        led_count: u32::try_from(controller.num_leds()).unwrap_or(u32::MAX),
    }
}

/// Awaits `request`, failing with [`SdkError::Timeout`] after `limit`.
async fn bounded<T>(
    limit: Duration,
    request: impl Future<Output = OpenRgbResult<T>>,
) -> Result<T, SdkError> {
    match time::timeout(limit, request).await {
        Ok(result) => result.map_err(SdkError::from),
        Err(_) => Err(SdkError::Timeout(limit)),
    }
}

/// Queues `leds` into one command and sends it.
async fn push_leds(
    controller: &Controller,
    leds: impl IntoIterator<Item = (usize, Color)>,
) -> OpenRgbResult<()> {
    let mut cmd = controller.cmd();
    for (led, color) in leds {
        cmd.set_led(led, color)?;
    }
    cmd.execute().await?;
    Ok(())
}

// ── LedController implementation ──────────────────────────────────────────────

/// An open SDK connection and the keyboard it is bound to.
struct Connection {
    // Held so the connection stays open for as long as the controller is used.
    _client: OpenRgbClient,
    controller: Controller,
}

/// One keyboard driven over its own SDK connection.
pub struct OpenRgbDevice {
    connection: Mutex<Option<Connection>>,
    info: DeviceInfo,
    timeout: Duration,
}

impl OpenRgbDevice {
    fn new(client: OpenRgbClient, controller: Controller, timeout: Duration) -> Self {
        let info = device_info(&controller);
        Self {
            connection: Mutex::new(Some(Connection {
                _client: client,
                controller,
            })),
            info,
            timeout,
        }
    }

    async fn push(&self, leds: Vec<(usize, Color)>) -> Result<(), SdkError> {
        let mut slot = self.connection.lock().await;
        let Some(connection) = slot.as_ref() else {
            return Err(SdkError::Disconnected);
        };
        let result = bounded(self.timeout, push_leds(&connection.controller, leds)).await;
        if result.is_err() {
            *slot = None;
        }
        result
    }
}

#[async_trait]
impl LedController for OpenRgbDevice {
    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn set_color(&self, led: LedIndex, color: Rgb) -> Result<(), SdkError> {
        if led.0 >= self.info.led_count {
            return Err(SdkError::LedOutOfRange {
                led,
                led_count: self.info.led_count,
            });
        }
        self.push(vec![(led.0 as usize, to_sdk_color(color))]).await
    }

    async fn fill(&self, color: Rgb) -> Result<(), SdkError> {
        let color = to_sdk_color(color);
        let leds = (0..self.info.led_count as usize).map(|led| (led, color)).collect();
        self.push(leds).await
    }

    async fn enable_direct_mode(&self) -> Result<(), SdkError> {
        let mut slot = self.connection.lock().await;
        let Some(connection) = slot.as_ref() else {
            return Err(SdkError::Disconnected);
        };
        let result = bounded(self.timeout, connection.controller.init()).await;
        if result.is_err() {
            *slot = None;
        }
        result.map(|_| ())
    }

    async fn disconnect(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!("closed SDK connection for {}", self.info.location);
        }
    }
}

// ── DeviceConnector implementation ────────────────────────────────────────────

/// Opens connections to a fixed SDK server address.
#[derive(Debug, Clone)]
pub struct OpenRgbConnector {
    host: String,
    port: u16,
    client_name: String,
    timeout: Duration,
}

impl OpenRgbConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            client_name: client_name.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&self) -> Result<OpenRgbClient, SdkError> {
        let connecting =
            OpenRgbClient::connect_to((self.host.as_str(), self.port), SDK_PROTOCOL_VERSION);
        let mut client = match time::timeout(self.timeout, connecting).await {
            Ok(Ok(client)) => client,
            Ok(Err(source)) => {
                return Err(SdkError::ConnectFailed {
                    addr: self.addr(),
                    source,
                })
            }
            Err(_) => return Err(SdkError::Timeout(self.timeout)),
        };
        bounded(self.timeout, client.set_name(self.client_name.as_str())).await?;
        debug!("connected to OpenRGB SDK at {}", self.addr());
        Ok(client)
    }

    async fn keyboards(&self, client: &OpenRgbClient) -> Result<Vec<Controller>, SdkError> {
        let keyboards = bounded(
            self.timeout,
            client.get_controllers_of_type(DeviceType::Keyboard),
        )
        .await?;
        Ok(keyboards.into_iter().collect())
    }
}

#[async_trait]
impl DeviceConnector for OpenRgbConnector {
    async fn list_keyboards(&self) -> Result<Vec<DeviceInfo>, SdkError> {
        let client = self.open().await?;
        let keyboards = self.keyboards(&client).await?;
        Ok(keyboards.iter().map(device_info).collect())
    }

    async fn connect(&self, location: &str) -> Result<Arc<dyn LedController>, SdkError> {
        let client = self.open().await?;
        let Some(controller) = self
            .keyboards(&client)
            .await?
            .into_iter()
            .find(|c| c.location() == location)
        else {
            return Err(SdkError::DeviceNotFound(location.to_string()));
        };
        let device = OpenRgbDevice::new(client, controller, self.timeout);
        let info = device.device_info();
        info!(
            "attached to {} {} at {} ({} LEDs)",
            info.vendor, info.name, info.location, info.led_count
        );
        Ok(Arc::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_addr_joins_host_and_port() {
        let connector =
            OpenRgbConnector::new("127.0.0.1", 6742, "rgbfade", Duration::from_millis(250));
        assert_eq!(connector.addr(), "127.0.0.1:6742");
    }
}
