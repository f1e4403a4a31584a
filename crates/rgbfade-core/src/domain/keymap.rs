//! Key-to-LED association learned during calibration.
//!
//! The OpenRGB SDK exposes a keyboard's LEDs as a flat list with no standard
//! ordering, so the only way to know which LED sits under which key is to ask
//! the user.  The result of that calibration is a [`Keymap`]: for each
//! physical key ([`KeyId`]) the index of the LED beneath it ([`LedIndex`]).
//!
//! A keymap is only valid for the device it was recorded on, identified by a
//! [`DeviceSignature`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque, stable identifier of a physical key as reported by the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub u16);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {:#06x}", self.0)
    }
}

/// Index into the SDK's flat LED list for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedIndex(pub u32);

impl fmt::Display for LedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LED {}", self.0)
    }
}

/// One `(key, led)` pair as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeymapEntry {
    pub key: KeyId,
    pub led: LedIndex,
}

/// Errors raised when building or validating a [`Keymap`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeymapError {
    #[error("{key} is mapped more than once")]
    DuplicateKey { key: KeyId },

    #[error("{led} is out of range for a device with {led_count} LEDs")]
    LedOutOfRange { led: LedIndex, led_count: u32 },
}

/// Identity of a keyboard as reported by the SDK.
///
/// A stored keymap applies to a live device only when all three fields match;
/// in particular a changed LED count invalidates the keymap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSignature {
    pub vendor: String,
    pub name: String,
    pub led_count: u32,
}

impl DeviceSignature {
    pub fn new(vendor: impl Into<String>, name: impl Into<String>, led_count: u32) -> Self {
        Self {
            vendor: vendor.into(),
            name: name.into(),
            led_count,
        }
    }

    /// File-name-safe identifier: `"<vendor>-<name>"`, lowercased, with every
    /// character other than ASCII alphanumerics, `-` and `_` replaced by `_`.
    ///
    /// The LED count is not part of the slug, so a device whose LED count
    /// changed maps to the same file and is reported as a mismatch.
    pub fn slug(&self) -> String {
        fn clean(s: &str) -> String {
            s.trim()
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c.to_ascii_lowercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        }
        let vendor = clean(&self.vendor);
        let name = clean(&self.name);
        match (vendor.is_empty(), name.is_empty()) {
            (true, true) => "unknown".to_string(),
            (true, false) => name,
            (false, true) => vendor,
            (false, false) => format!("{vendor}-{name}"),
        }
    }
}

impl fmt::Display for DeviceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vendor.is_empty() {
            write!(f, "{} ({} LEDs)", self.name, self.led_count)
        } else {
            write!(f, "{} {} ({} LEDs)", self.vendor, self.name, self.led_count)
        }
    }
}

/// Mapping from [`KeyId`] to [`LedIndex`] with a reverse lookup.
///
/// Each key maps to exactly one LED.  LED indices are normally unique too, but
/// a pathological device could report two keys on one LED; in that case the
/// reverse lookup returns the key inserted last.
#[derive(Debug, Clone, Default)]
pub struct Keymap {
    by_key: BTreeMap<KeyId, LedIndex>,
    by_led: BTreeMap<LedIndex, KeyId>,
}

impl PartialEq for Keymap {
    fn eq(&self, other: &Self) -> bool {
        self.by_key == other.by_key
    }
}

impl Eq for Keymap {}

impl Keymap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a keymap from stored entries, rejecting duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::DuplicateKey`] if the same key appears twice.
    pub fn from_entries(
        entries: impl IntoIterator<Item = KeymapEntry>,
    ) -> Result<Self, KeymapError> {
        let mut keymap = Keymap::new();
        for entry in entries {
            if keymap.insert(entry.key, entry.led).is_some() {
                return Err(KeymapError::DuplicateKey { key: entry.key });
            }
        }
        Ok(keymap)
    }

    /// Maps `key` to `led`, returning the LED the key was previously mapped to.
    ///
    /// A remapped key no longer drives its previous LED.
    pub fn insert(&mut self, key: KeyId, led: LedIndex) -> Option<LedIndex> {
        let previous = self.by_key.insert(key, led);
        if let Some(old_led) = previous {
            if self.by_led.get(&old_led) == Some(&key) {
                self.by_led.remove(&old_led);
            }
        }
        self.by_led.insert(led, key);
        previous
    }

    pub fn led_for(&self, key: KeyId) -> Option<LedIndex> {
        self.by_key.get(&key).copied()
    }

    pub fn key_for(&self, led: LedIndex) -> Option<KeyId> {
        self.by_led.get(&led).copied()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// All entries ordered by LED index, then key.
    pub fn entries(&self) -> Vec<KeymapEntry> {
        let mut entries: Vec<KeymapEntry> = self
            .by_key
            .iter()
            .map(|(&key, &led)| KeymapEntry { key, led })
            .collect();
        entries.sort_by_key(|e| (e.led, e.key));
        entries
    }

    /// Checks that every LED index exists on a device with `led_count` LEDs.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::LedOutOfRange`] for the first offending entry.
    pub fn validate_for(&self, led_count: u32) -> Result<(), KeymapError> {
        match self.by_key.values().find(|led| led.0 >= led_count) {
            Some(&led) => Err(KeymapError::LedOutOfRange { led, led_count }),
            None => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
