//! Application layer use cases for rgbfade.
//!
//! # What use cases does rgbfade have?
//!
//! - **`calibrate`** – Lights each LED of a keyboard in turn and records the
//!   key the user presses, producing a keymap that is saved to disk.
//!
//! - **`fade_engine`** – Owns the per-LED fade states of one keyboard.  Key
//!   presses light an LED at full brightness; every tick pushes the decayed
//!   colors to the SDK server.
//!
//! - **`session`** – The per-keyboard event loop: feeds key events and ticks
//!   into the engine and reconnects when the SDK connection is lost.
//!
//! - **`retry`** / **`shutdown`** – Small helpers shared by the above: bounded
//!   backoff for connection attempts and the Ctrl-C signal.
//!
//! Every use case talks to the outside world only through the
//! `LedController`, `DeviceConnector`, and `InputSource` traits, so tests can
//! swap in the mock implementations.

pub mod calibrate;
pub mod fade_engine;
pub mod retry;
pub mod session;
pub mod shutdown;
