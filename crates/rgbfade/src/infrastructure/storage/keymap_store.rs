//! Persistent keymaps, one TOML file per keyboard model.
//!
//! Files live in `<config dir>/keymaps/<slug>.toml`, where the slug is
//! derived from the device vendor and name (see
//! [`DeviceSignature::slug`]).  The device signature is stored alongside the
//! entries so a keymap recorded for one LED layout is never applied to
//! another:
//!
//! ```toml
//! [device]
//! vendor = "Roccat"
//! name = "Vulcan TKL"
//! led_count = 87
//!
//! [[entries]]
//! key = 41
//! led = 0
//! ```
//!
//! Writes go to a temporary file in the same directory which is flushed and
//! then renamed over the target, so readers see either the old or the new
//! keymap and never a truncated one.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rgbfade_core::{DeviceSignature, Keymap, KeymapEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Error type for keymap persistence.
#[derive(Debug, Error)]
pub enum KeymapStoreError {
    /// No keymap has been recorded for this device yet.
    #[error("no keymap stored at {path}")]
    NotFound { path: PathBuf },

    /// The stored keymap was recorded on a different device.
    #[error("stored keymap is for {stored}, but the attached device is {live}")]
    DeviceMismatch {
        stored: DeviceSignature,
        live: DeviceSignature,
    },

    /// The file exists but its content is unusable.
    #[error("keymap file {path} is invalid: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A file system I/O error occurred.
    #[error("I/O error accessing keymap at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The keymap could not be serialized to TOML.
    #[error("failed to serialize keymap: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl KeymapStoreError {
    /// `true` for errors that are fixed by calibrating the device again.
    pub fn needs_calibration(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::DeviceMismatch { .. } | Self::Parse { .. }
        )
    }
}

/// On-disk layout of a keymap file.
#[derive(Debug, Serialize, Deserialize)]
struct KeymapFile {
    device: DeviceSignature,
    #[serde(default)]
    entries: Vec<KeymapEntry>,
}

/// Directory of keymap files.
#[derive(Debug, Clone)]
pub struct KeymapStore {
    dir: PathBuf,
}

impl KeymapStore {
    /// A store rooted directly at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store used by the application: `<config_dir>/keymaps`.
    pub fn in_config_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join("keymaps"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the keymap file for `device`.
    pub fn path_for(&self, device: &DeviceSignature) -> PathBuf {
        self.dir.join(format!("{}.toml", device.slug()))
    }

    pub fn exists(&self, device: &DeviceSignature) -> bool {
        self.path_for(device).is_file()
    }

    /// Loads the keymap recorded for `device`.
    ///
    /// # Errors
    ///
    /// - [`KeymapStoreError::NotFound`] when no file exists.
    /// - [`KeymapStoreError::DeviceMismatch`] when the file was recorded for a
    ///   device with a different vendor, name or LED count.
    /// - [`KeymapStoreError::Parse`] when the file is malformed, maps a key
    ///   twice, or refers to an LED the device does not have.
    pub fn load(&self, device: &DeviceSignature) -> Result<Keymap, KeymapStoreError> {
        let path = self.path_for(device);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeymapStoreError::NotFound { path })
            }
            Err(source) => return Err(KeymapStoreError::Io { path, source }),
        };

        let file: KeymapFile = toml::from_str(&content).map_err(|e| KeymapStoreError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if file.device != *device {
            return Err(KeymapStoreError::DeviceMismatch {
                stored: file.device,
                live: device.clone(),
            });
        }

        let keymap = Keymap::from_entries(file.entries).map_err(|e| KeymapStoreError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        keymap
            .validate_for(device.led_count)
            .map_err(|e| KeymapStoreError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!("loaded {} keymap entries from {}", keymap.len(), path.display());
        Ok(keymap)
    }

    /// Atomically replaces the keymap file for `device`.
    ///
    /// Returns the path written.
    pub fn save(&self, device: &DeviceSignature, keymap: &Keymap) -> Result<PathBuf, KeymapStoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| KeymapStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let file = KeymapFile {
            device: device.clone(),
            entries: keymap.entries(),
        };
        let content = toml::to_string_pretty(&file)?;

        let path = self.path_for(device);
        let tmp_path = self
            .dir
            .join(format!(".{}.toml.tmp-{}", device.slug(), std::process::id()));
        write_synced(&tmp_path, content.as_bytes()).map_err(|source| {
            let _ = std::fs::remove_file(&tmp_path);
            KeymapStoreError::Io {
                path: tmp_path.clone(),
                source,
            }
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = std::fs::remove_file(&tmp_path);
            KeymapStoreError::Io {
                path: path.clone(),
                source,
            }
        })?;

        info!("saved {} keymap entries to {}", keymap.len(), path.display());
        Ok(path)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
