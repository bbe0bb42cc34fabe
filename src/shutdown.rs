//! Graceful shutdown of the service and the metrics endpoint.
//!
//! One [`ShutdownCoordinator`] is shared by every long-running task; the
//! [`SignalHandler`] trips it on SIGINT or SIGTERM and each task stops
//! accepting work once [`ShutdownCoordinator::wait_for_shutdown`] resolves.

use crate::error::{Result, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Grace period for in-flight requests once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared shutdown switch. Clones observe the same switch.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tripped: Arc<watch::Sender<bool>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DRAIN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (tripped, _) = watch::channel(false);
        Self {
            tripped: Arc::new(tripped),
            timeout,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.tripped.borrow()
    }

    /// Trip the switch. Later calls do nothing.
    pub fn shutdown(&self) {
        let first = self.tripped.send_if_modified(|tripped| {
            let changed = !*tripped;
            *tripped = true;
            changed
        });
        if first {
            info!("Shutting down");
        }
    }

    /// Resolve once the switch is tripped.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.tripped.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|tripped| *tripped).await;
    }

    /// Owned future for APIs that take a `'static` shutdown signal.
    pub fn signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let coordinator = self.clone();
        async move { coordinator.wait_for_shutdown().await }
    }

    /// Grace period for in-flight work.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trips a coordinator on the first termination signal.
pub struct SignalHandler {
    coordinator: ShutdownCoordinator,
}

impl SignalHandler {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Wait for SIGTERM or SIGINT, then trip the coordinator.
    ///
    /// Returns early if the coordinator was tripped some other way.
    #[cfg(unix)]
    pub async fn run(self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let listen = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| {
                StoreError::Internal(format!("Cannot listen for {}: {}", name, e))
            })
        };
        let mut term = listen(SignalKind::terminate(), "SIGTERM")?;
        let mut int = listen(SignalKind::interrupt(), "SIGINT")?;

        tokio::select! {
            _ = term.recv() => info!(signal = "SIGTERM", "Signal received"),
            _ = int.recv() => info!(signal = "SIGINT", "Signal received"),
            _ = self.coordinator.wait_for_shutdown() => return Ok(()),
        }

        self.coordinator.shutdown();
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn run(self) -> Result<()> {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| {
                    StoreError::Internal(format!("Cannot listen for Ctrl+C: {}", e))
                })?;
                info!(signal = "Ctrl+C", "Signal received");
            }
            _ = self.coordinator.wait_for_shutdown() => return Ok(()),
        }

        self.coordinator.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_is_sticky() {
        let switch = ShutdownCoordinator::new();
        assert!(!switch.is_shutting_down());
        switch.shutdown();
        switch.shutdown();
        assert!(switch.is_shutting_down());
        assert!(switch.clone().is_shutting_down());
    }

    #[tokio::test]
    async fn test_signal_resolves_after_shutdown() {
        let switch = ShutdownCoordinator::with_timeout(Duration::from_secs(1));
        let waiter = tokio::spawn(switch.signal());

        switch.shutdown();
        let result = tokio::time::timeout(Duration::from_millis(500), waiter).await;
        assert!(result.is_ok());
        assert_eq!(switch.timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_resolves_immediately() {
        let switch = ShutdownCoordinator::new();
        switch.shutdown();
        let waited = tokio::time::timeout(Duration::from_millis(100), switch.wait_for_shutdown()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn test_handler_returns_when_already_shut_down() {
        let switch = ShutdownCoordinator::new();
        switch.shutdown();
        let handler = SignalHandler::new(switch);
        let result = tokio::time::timeout(Duration::from_millis(500), handler.run()).await;
        assert!(result.unwrap().is_ok());
    }
}
