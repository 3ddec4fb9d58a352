//! Per-device serialization for multi-step operations

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per device id.
///
/// Held across awaits for the whole of an operation, so two operations on
/// the same device run one after the other while other devices proceed.
/// The map lock itself is never held across an await.
#[derive(Default)]
pub(crate) struct DeviceGates {
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DeviceGates {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `device_id`
    pub(crate) async fn lock(&self, device_id: &str) -> OwnedMutexGuard<()> {
        let gate = self
            .gates
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone();
        gate.lock_owned().await
    }
}
