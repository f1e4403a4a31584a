//! Process-level fatal errors and their exit codes.
//!
//! Every layer has its own `thiserror` enum.  The ones that can end the
//! process are folded into [`FatalError`] at the application edge; `main`
//! carries it through `anyhow` and maps it to an exit code on the way out.
//! Errors that end a single fade session are not among them: `App` re-attaches
//! or re-calibrates that keyboard instead.
//!
//! | Exit code | Meaning                               |
//! |-----------|---------------------------------------|
//! | 0         | normal exit, including Ctrl-C         |
//! | 2         | config file unreadable or invalid     |
//! | 3         | OpenRGB SDK server unreachable        |
//! | 4         | keyboard input could not be captured  |
//! | 5         | keymap file could not be read/written |
//! | 1         | anything else                         |

use thiserror::Error;

use crate::application::calibrate::CalibrationError;
use crate::application::retry::ConnectError;
use crate::infrastructure::input_capture::CaptureError;
use crate::infrastructure::lighting::SdkError;
use crate::infrastructure::storage::config::ConfigError;
use crate::infrastructure::storage::keymap_store::KeymapStoreError;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connecting to the SDK server failed after all retries.
    #[error(transparent)]
    SdkConnection(#[from] ConnectError),

    /// An SDK request failed on an established connection.
    #[error(transparent)]
    SdkRequest(#[from] SdkError),

    #[error(transparent)]
    Input(#[from] CaptureError),

    #[error("no keyboard could be attached: {0}")]
    NoKeyboard(String),

    #[error(transparent)]
    KeymapStorage(#[from] KeymapStoreError),

    #[error("no keyboard at {location}; run `rgbfade devices` to list locations")]
    UnknownDevice { location: String },
}

impl FatalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::SdkConnection(_) | Self::SdkRequest(_) => 3,
            Self::Input(_) | Self::NoKeyboard(_) => 4,
            Self::KeymapStorage(_) => 5,
            Self::UnknownDevice { .. } => 1,
        }
    }
}

impl From<CalibrationError> for FatalError {
    fn from(e: CalibrationError) -> Self {
        match e {
            CalibrationError::Sdk(e) => Self::SdkRequest(e),
            CalibrationError::InputClosed => Self::Input(CaptureError::Closed),
            CalibrationError::Store(e) => Self::KeymapStorage(e),
        }
    }
}

/// Exit code for an error that reached `main`.
///
/// Walks the error chain for a [`FatalError`]; anything else exits with 1.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<FatalError>())
        .map_or(1, FatalError::exit_code)
}
