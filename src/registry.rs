//! In-memory registry of known Extron devices.
//!
//! The registry is the single piece of shared mutable state in the server.
//! It maps device names (as reported by the units themselves) to their serial
//! paths, and is only ever mutated by a rescan, which replaces the full set
//! under one write lock. Readers see either the pre-rescan or post-rescan
//! snapshot, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::driver::{DriverError, SwitchDriver};

/// A discovered Extron switching unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unit name as returned by the SIS name query. Unique within the registry.
    pub name: String,
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub path: String,
}

/// Cloneable handle to the device registry.
///
/// Cloning is cheap — all clones share the same underlying map.
#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, Device>>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Snapshot of all known devices, sorted by name. Empty is a valid result.
    pub async fn list(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        let mut list: Vec<Device> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Look up a device by name, returning a clone of its descriptor.
    ///
    /// Callers take the clone and release the lock before doing any device
    /// I/O, so a slow serial exchange never holds up the registry.
    pub async fn lookup(&self, name: &str) -> Option<Device> {
        self.devices.read().await.get(name).cloned()
    }

    /// Number of known devices.
    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Replace the full device set. Duplicate names keep the last entry.
    ///
    /// Returns the resulting device count.
    pub async fn replace_all(&self, discovered: Vec<Device>) -> usize {
        let map: HashMap<String, Device> = discovered
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        let count = map.len();
        *self.devices.write().await = map;
        count
    }

    /// Re-enumerate devices via the driver and swap in the result.
    ///
    /// Discovery runs on the blocking pool — it opens and probes serial
    /// ports. On success the previous set is replaced atomically; on failure
    /// the previous set is retained unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Discovery`] when the driver cannot enumerate
    /// devices.
    pub async fn rescan(&self, driver: Arc<dyn SwitchDriver>) -> Result<usize, DriverError> {
        let discovered = tokio::task::spawn_blocking(move || driver.discover())
            .await
            .map_err(|e| DriverError::Discovery(format!("discovery task failed: {e}")))??;
        Ok(self.replace_all(discovered).await)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe all locally attached devices once, tolerating failure.
///
/// Used at server startup so `/api/devices` is populated without requiring an
/// explicit rescan first. A failed initial scan leaves the registry empty and
/// logs a warning — the server still starts.
pub async fn initial_scan(registry: &DeviceRegistry, driver: Arc<dyn SwitchDriver>) {
    match registry.rescan(driver).await {
        Ok(count) => info!("Initial scan found {count} device(s)"),
        Err(e) => warn!("Initial scan failed: {e}"),
    }
}
