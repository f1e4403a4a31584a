//! Process-wide shutdown signal.
//!
//! Ctrl-C flips a `watch` channel once; every long-running loop holds a
//! [`ShutdownSignal`] clone and selects on [`ShutdownSignal::triggered`].

use tokio::sync::watch;

/// Creates a connected trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal(rx))
}

/// Sending half; owned by whoever handles Ctrl-C.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half; cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// Never resolves if the trigger is dropped without firing.
    pub async fn triggered(&mut self) {
        if self.0.wait_for(|&stop| stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_signal_resolves_after_trigger() {
        // Arrange
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        // Act
        trigger.trigger();

        // Assert
        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .expect("signal must resolve");
        assert!(signal.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trigger_never_resolves() {
        let (trigger, mut signal) = shutdown_channel();
        drop(trigger);

        let result = tokio::time::timeout(Duration::from_secs(5), signal.triggered()).await;
        assert!(result.is_err(), "a dropped trigger is not a shutdown request");
    }
}
