//! TOML-based configuration for rgbfade.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\rgbfade\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/rgbfade/config.toml` or `~/.config/rgbfade/config.toml`
//! - macOS:    `~/Library/Application Support/rgbfade/config.toml`
//!
//! On first run the file does not exist yet; it is created with every option
//! at its default so the user has something to edit.
//!
//! # Example
//!
//! ```toml
//! sdk_host = "127.0.0.1"
//! sdk_port = 6742
//! fade_duration_ms = 1500
//! decay_curve = "exponential"
//! base_color = { r = 0, g = 180, b = 255 }
//! ```
//!
//! Every key is optional.  Fields annotated with `#[serde(default = "…")]`
//! take the value of that function when absent, so a partial file keeps the
//! defaults for everything it does not mention.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rgbfade_core::{DecayCurve, Rgb};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the per-user config directory.
const APP_DIR_NAME: &str = "rgbfade";

/// Port the OpenRGB SDK server listens on unless configured otherwise.
const DEFAULT_SDK_PORT: u16 = 6742;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Host of the OpenRGB SDK server.
    #[serde(default = "default_sdk_host")]
    pub sdk_host: String,
    #[serde(default = "default_sdk_port")]
    pub sdk_port: u16,
    /// Name shown in the OpenRGB client list.
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Time for a lit LED to fade to off.
    #[serde(default = "default_fade_duration_ms")]
    pub fade_duration_ms: u64,
    /// Interval between fade ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Color a key lights up with.
    #[serde(default = "default_base_color")]
    pub base_color: Rgb,
    #[serde(default)]
    pub decay_curve: DecayCurve,

    /// Color of the LED the calibration is waiting on.
    #[serde(default = "default_prompt_color")]
    pub prompt_color: Rgb,
    /// How long calibration waits for a key before skipping the LED.
    #[serde(default = "default_calibration_timeout_ms")]
    pub calibration_timeout_ms: u64,

    /// Upper bound for each SDK write or reply.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    /// Consecutive failed pushes before the connection is considered lost.
    #[serde(default = "default_max_push_failures")]
    pub max_push_failures: u32,
    /// Connection attempts before giving up on the SDK server.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// How often the SDK server is asked for keyboards that appeared or
    /// came back while running.
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,

    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_sdk_host() -> String {
    "127.0.0.1".to_string()
}
fn default_sdk_port() -> u16 {
    DEFAULT_SDK_PORT
}
fn default_client_name() -> String {
    "rgbfade".to_string()
}
fn default_fade_duration_ms() -> u64 {
    1000
}
fn default_tick_interval_ms() -> u64 {
    16
}
fn default_base_color() -> Rgb {
    Rgb::new(255, 100, 255)
}
fn default_prompt_color() -> Rgb {
    Rgb::WHITE
}
fn default_calibration_timeout_ms() -> u64 {
    10_000
}
fn default_push_timeout_ms() -> u64 {
    250
}
fn default_max_push_failures() -> u32 {
    30
}
fn default_connect_attempts() -> u32 {
    10
}
fn default_rescan_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sdk_host: default_sdk_host(),
            sdk_port: default_sdk_port(),
            client_name: default_client_name(),
            fade_duration_ms: default_fade_duration_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            base_color: default_base_color(),
            decay_curve: DecayCurve::default(),
            prompt_color: default_prompt_color(),
            calibration_timeout_ms: default_calibration_timeout_ms(),
            push_timeout_ms: default_push_timeout_ms(),
            max_push_failures: default_max_push_failures(),
            connect_attempts: default_connect_attempts(),
            rescan_interval_ms: default_rescan_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects zero durations, thresholds and attempt counts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero: [(&'static str, u64); 7] = [
            ("fade_duration_ms", self.fade_duration_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("calibration_timeout_ms", self.calibration_timeout_ms),
            ("push_timeout_ms", self.push_timeout_ms),
            ("max_push_failures", u64::from(self.max_push_failures)),
            ("connect_attempts", u64::from(self.connect_attempts)),
            ("rescan_interval_ms", self.rescan_interval_ms),
        ];
        if let Some(&(field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "client_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_duration_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for rgbfade's files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the default path of the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Where the config returned by [`load_or_create`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Read from an existing file.
    Loaded,
    /// No file existed; the defaults were written to disk.
    Created,
}

/// Loads the config at `path`, creating it with defaults when absent.
///
/// Does not log; the caller reports [`ConfigOrigin::Created`] once logging
/// is initialised.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors, [`ConfigError::Parse`]
/// for malformed TOML and [`ConfigError::Invalid`] for unusable values.
pub fn load_or_create(path: &Path) -> Result<(AppConfig, ConfigOrigin), ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok((AppConfig::from_toml(&content)?, ConfigOrigin::Loaded)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let cfg = AppConfig::default();
            save_config(path, &cfg)?;
            Ok((cfg, ConfigOrigin::Created))
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join(APP_DIR_NAME))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME)
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join(APP_DIR_NAME))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.sdk_host, "127.0.0.1");
        assert_eq!(cfg.sdk_port, 6742);
        assert_eq!(cfg.fade_duration(), Duration::from_millis(1000));
        assert_eq!(cfg.tick_interval(), Duration::from_millis(16));
        assert_eq!(cfg.base_color, Rgb::new(255, 100, 255));
        assert_eq!(cfg.decay_curve, DecayCurve::Linear);
        assert_eq!(cfg.max_push_failures, 30);
        assert_eq!(cfg.rescan_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg = AppConfig::from_toml("").expect("empty file is valid");
        assert_eq!(cfg, AppConfig::default());
    }

    // ── Partial and invalid files ─────────────────────────────────────────────

    #[test]
    fn test_partial_toml_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
fade_duration_ms = 2500
decay_curve = "exponential"
base_color = { r = 0, g = 180, b = 255 }
"#;

        // Act
        let cfg = AppConfig::from_toml(toml_str).expect("partial config");

        // Assert
        assert_eq!(cfg.fade_duration_ms, 2500);
        assert_eq!(cfg.decay_curve, DecayCurve::Exponential);
        assert_eq!(cfg.base_color, Rgb::new(0, 180, 255));
        // Unspecified fields keep their defaults
        assert_eq!(cfg.sdk_port, 6742);
        assert_eq!(cfg.tick_interval_ms, 16);
    }

    #[test]
    fn test_zero_fade_duration_is_invalid() {
        let result = AppConfig::from_toml("fade_duration_ms = 0");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "fade_duration_ms", .. })
        ));
    }

    #[test]
    fn test_zero_rescan_interval_is_invalid() {
        let result = AppConfig::from_toml("rescan_interval_ms = 0");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "rescan_interval_ms", .. })
        ));
    }

    #[test]
    fn test_zero_connect_attempts_is_invalid() {
        let result = AppConfig::from_toml("connect_attempts = 0");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "connect_attempts", .. })
        ));
    }

    #[test]
    fn test_unknown_curve_is_parse_error() {
        let result = AppConfig::from_toml(r#"decay_curve = "bouncy""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            AppConfig::from_toml("[[[ not valid toml"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_color_channel_out_of_range_is_parse_error() {
        let result = AppConfig::from_toml("base_color = { r = 300, g = 0, b = 0 }");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // ── File handling ─────────────────────────────────────────────────────────

    #[test]
    fn test_load_or_create_writes_defaults_on_first_run() {
        // Arrange
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        // Act
        let (cfg, origin) = load_or_create(&path).expect("first run");

        // Assert
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(origin, ConfigOrigin::Created);
        assert!(path.exists(), "default config must be written");
        let (reloaded, origin) = load_or_create(&path).expect("second run");
        assert_eq!(reloaded, cfg);
        assert_eq!(origin, ConfigOrigin::Loaded);
    }

    #[test]
    fn test_load_or_create_reads_existing_file() {
        // Arrange
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sdk_port = 7000\nlog_level = \"debug\"\n").expect("write");

        // Act
        let (cfg, origin) = load_or_create(&path).expect("load");

        // Assert
        assert_eq!(origin, ConfigOrigin::Loaded);
        assert_eq!(cfg.sdk_port, 7000);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn test_load_or_create_reports_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tick_interval_ms = 0\n").expect("write");

        assert!(matches!(
            load_or_create(&path),
            Err(ConfigError::Invalid { field: "tick_interval_ms", .. })
        ));
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("rgbfade/config.toml") || path.ends_with("rgbfade\\config.toml"));
        }
        // NoPlatformConfigDir in a stripped environment is also acceptable.
    }
}
