//! Mock LED controller for unit testing.
//!
//! Records every command in order and can be switched into a failing state to
//! simulate a lost SDK connection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rgbfade_core::{LedIndex, Rgb};

use super::{DeviceConnector, DeviceInfo, LedController, SdkError};

/// A command received by [`MockLedController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCommand {
    Set(LedIndex, Rgb),
    Fill(Rgb),
    DirectMode,
}

type SetHook = Box<dyn Fn(LedIndex, Rgb) + Send + Sync>;

/// In-memory [`LedController`].
pub struct MockLedController {
    info: DeviceInfo,
    commands: Mutex<Vec<LedCommand>>,
    failing: AtomicBool,
    failed_calls: AtomicUsize,
    disconnected: AtomicBool,
    on_set: Mutex<Option<SetHook>>,
}

impl MockLedController {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            commands: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            failed_calls: AtomicUsize::new(0),
            disconnected: AtomicBool::new(false),
            on_set: Mutex::new(None),
        }
    }

    /// A keyboard with `led_count` LEDs at `HID: /dev/hidraw0`.
    pub fn keyboard(led_count: u32) -> Self {
        Self::keyboard_at("HID: /dev/hidraw0", led_count)
    }

    pub fn keyboard_at(location: &str, led_count: u32) -> Self {
        Self::new(DeviceInfo {
            name: "Mock Keyboard".to_string(),
            vendor: "Mock".to_string(),
            location: location.to_string(),
            led_count,
        })
    }

    /// Makes every subsequent command fail with [`SdkError::Disconnected`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of commands rejected while failing.
    pub fn failed_calls(&self) -> usize {
        self.failed_calls.load(Ordering::SeqCst)
    }

    /// Installs a callback invoked on every successful `set_color`.
    pub fn on_set_color(&self, hook: impl Fn(LedIndex, Rgb) + Send + Sync + 'static) {
        *self.on_set.lock().expect("lock poisoned") = Some(Box::new(hook));
    }

    /// All commands received so far, oldest first.
    pub fn commands(&self) -> Vec<LedCommand> {
        self.commands.lock().expect("lock poisoned").clone()
    }

    /// Only the single-LED pushes, oldest first.
    pub fn set_commands(&self) -> Vec<(LedIndex, Rgb)> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                LedCommand::Set(led, color) => Some((led, color)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().expect("lock poisoned").clear();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn record(&self, command: LedCommand) -> Result<(), SdkError> {
        if self.failing.load(Ordering::SeqCst) || self.is_disconnected() {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(SdkError::Disconnected);
        }
        self.commands.lock().expect("lock poisoned").push(command);
        Ok(())
    }
}

#[async_trait]
impl LedController for MockLedController {
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
        self.record(LedCommand::Set(led, color))?;
        if let Some(hook) = self.on_set.lock().expect("lock poisoned").as_ref() {
            hook(led, color);
        }
        Ok(())
    }

    async fn fill(&self, color: Rgb) -> Result<(), SdkError> {
        self.record(LedCommand::Fill(color))
    }

    async fn enable_direct_mode(&self) -> Result<(), SdkError> {
        self.record(LedCommand::DirectMode)
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// [`DeviceConnector`] handing out prepared mock controllers in order.
///
/// Each location has its own queue.  `connect` pops the next controller of
/// that queue and fails once it is empty or for an unknown location.
/// `list_keyboards` reports the controller each non-empty queue would hand
/// out next.
pub struct MockConnector {
    queues: Mutex<BTreeMap<String, Vec<Arc<MockLedController>>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(location: impl Into<String>, controllers: Vec<Arc<MockLedController>>) -> Self {
        let connector = Self {
            queues: Mutex::new(BTreeMap::new()),
            connects: AtomicUsize::new(0),
        };
        connector.plug(location, controllers);
        connector
    }

    /// Replaces the queue for `location`, as if a keyboard appeared there.
    pub fn plug(&self, location: impl Into<String>, controllers: Vec<Arc<MockLedController>>) {
        let mut queue = controllers;
        queue.reverse();
        self.queues
            .lock()
            .expect("lock poisoned")
            .insert(location.into(), queue);
    }

    /// Number of connection attempts made so far.
    pub fn connect_attempts(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn list_keyboards(&self) -> Result<Vec<DeviceInfo>, SdkError> {
        let queues = self.queues.lock().expect("lock poisoned");
        Ok(queues
            .values()
            .filter_map(|queue| queue.last().map(|c| c.device_info().clone()))
            .collect())
    }

    async fn connect(&self, location: &str) -> Result<Arc<dyn LedController>, SdkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut queues = self.queues.lock().expect("lock poisoned");
        let Some(queue) = queues.get_mut(location) else {
            return Err(SdkError::DeviceNotFound(location.to_string()));
        };
        match queue.pop() {
            Some(controller) => Ok(controller as Arc<dyn LedController>),
            None => Err(SdkError::Disconnected),
        }
    }
}
