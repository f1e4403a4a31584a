//! Infrastructure layer for rgbfade.
//!
//! Contains the OS- and network-facing adapters.  The application layer
//! drives them through the [`lighting::LedController`],
//! [`lighting::DeviceConnector`] and [`input_capture::InputSource`] traits.
//!
//! # Sub-modules
//!
//! - **`input_capture`** – Reads key reports from the keyboard's hidraw node on
//!   a dedicated thread and hands them to async code through a bounded,
//!   drop-oldest channel.  A `MockInputSource` is provided for tests.
//!
//! - **`lighting`** – OpenRGB SDK adapter over the `openrgb2` client.  Lists
//!   keyboards and pushes LED colors, with every call bounded by a timeout.
//!   A `MockLedController` is provided for tests.
//!
//! - **`storage`** – The TOML config file and the per-device keymap files.

pub mod input_capture;
pub mod lighting;
pub mod storage;
