//! Bounded retry with linear backoff for SDK connections.
//!
//! After failed attempt `n` (1-based) the next attempt waits
//! `min(250 ms × n, 10 s)`.  A shutdown request interrupts the wait.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time;
use tracing::warn;

use super::shutdown::ShutdownSignal;
use crate::infrastructure::lighting::SdkError;

/// Backoff growth per failed attempt.
pub const BACKOFF_STEP: Duration = Duration::from_millis(250);

/// Upper bound of a single backoff wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Why a retried connection did not produce a value.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every attempt failed.
    #[error("could not reach the OpenRGB SDK server after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: SdkError,
    },
    /// Shutdown was requested while retrying.
    #[error("connection attempts cancelled by shutdown")]
    Cancelled,
}

/// Wait before the attempt following failed attempt `failed_attempt`.
pub fn backoff_delay(failed_attempt: u32) -> Duration {
    BACKOFF_STEP.saturating_mul(failed_attempt).min(MAX_BACKOFF)
}

/// Runs `op` up to `attempts` times, backing off between failures.
///
/// `what` names the operation in log messages.
///
/// # Errors
///
/// Returns [`ConnectError::Exhausted`] carrying the last error once all
/// attempts failed, or [`ConnectError::Cancelled`] if `shutdown` fires first.
pub async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    attempts: u32,
    shutdown: &mut ShutdownSignal,
    mut op: F,
) -> Result<T, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SdkError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        if shutdown.is_triggered() {
            return Err(ConnectError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.triggered() => return Err(ConnectError::Cancelled),
            result = op() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(last) if attempt >= attempts => {
                return Err(ConnectError::Exhausted { attempts, last });
            }
            Err(e) => {
                let delay = backoff_delay(attempt);
                warn!("{what} failed (attempt {attempt}/{attempts}): {e}; retrying in {delay:?}");
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => return Err(ConnectError::Cancelled),
                    _ = time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
