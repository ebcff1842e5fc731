//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::config::Config;
use crate::driver::SwitchDriver;
use crate::registry::DeviceRegistry;

/// Shared application state for the exctl server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The set of known devices, replaced atomically by rescans.
    pub registry: DeviceRegistry,
    /// Serial communication with the physical devices.
    pub driver: Arc<dyn SwitchDriver>,
    /// Orderly-shutdown trigger shared by the stop endpoint and the signal
    /// handler.
    pub shutdown: ShutdownHandle,
}

/// Cloneable handle used to request and observe server shutdown.
///
/// Both `POST /api/stop` and SIGINT/SIGTERM funnel through this handle, so
/// there is a single drain path regardless of how shutdown was requested.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Request shutdown. Idempotent, works with or without subscribers.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver that resolves once shutdown is requested.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_observable_and_idempotent() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_requested());

        let mut rx = handle.subscribe();
        handle.trigger();
        handle.trigger();
        assert!(handle.is_requested());
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
