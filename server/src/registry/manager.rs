//! Registry of all currently reachable devices

use super::connection::{ConnectionId, DeviceTransport};
use crate::broadcast::EventBroadcaster;
use crate::events::HubEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Status snapshot of one registered device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub connection_id: String,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

struct DeviceEntry {
    transport: Arc<dyn DeviceTransport>,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Tracks which devices are reachable and through which transport.
///
/// The map lock is only held for in-memory operations; events are published
/// after it is released.
pub struct ConnectionRegistry {
    /// Map of device_id -> registration
    devices: RwLock<HashMap<String, DeviceEntry>>,
    events: Arc<EventBroadcaster>,
}

impl ConnectionRegistry {
    /// Create an empty registry publishing to `events`
    pub fn new(events: Arc<EventBroadcaster>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a device, replacing any previous transport for the same id.
    ///
    /// The replaced transport is not closed; its own I/O failure will lead
    /// to an `unregister` that no longer matches anything.
    /// Returns `false` if the id is empty.
    pub async fn register(&self, device_id: &str, transport: Arc<dyn DeviceTransport>) -> bool {
        if device_id.is_empty() {
            warn!(peer = %transport.peer(), "rejecting registration without device id");
            return false;
        }

        let now = Utc::now();
        let conn = transport.connection_id();
        let peer = transport.peer();
        let entry = DeviceEntry {
            transport,
            connected_at: now,
            last_seen: now,
        };

        let (replaced, devices) = {
            let mut devices = self.devices.write().await;
            let replaced = devices.insert(device_id.to_string(), entry);
            (replaced, sorted_ids(&devices))
        };

        match replaced {
            Some(old) => info!(
                device = device_id,
                conn = %conn,
                stale_conn = %old.transport.connection_id(),
                "device re-registered"
            ),
            None => info!(device = device_id, conn = %conn, peer = %peer, total = devices.len(), "device connected"),
        }

        self.events.publish(HubEvent::MembershipChanged { devices });
        self.events.publish(HubEvent::NewMessage {
            device_id: device_id.to_string(),
            message: "Device connected successfully".to_string(),
            timestamp: now,
        });
        true
    }

    /// Remove every device bound to the given transport and return their ids
    pub async fn unregister(&self, connection: ConnectionId) -> Vec<String> {
        let (removed, devices) = {
            let mut devices = self.devices.write().await;
            let removed: Vec<String> = devices
                .iter()
                .filter(|(_, entry)| entry.transport.connection_id() == connection)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &removed {
                devices.remove(id);
            }
            (removed, sorted_ids(&devices))
        };

        for id in &removed {
            info!(device = %id, conn = %connection, total = devices.len(), "device disconnected");
        }

        self.events.publish(HubEvent::MembershipChanged { devices });
        removed
    }

    /// Resolve the current transport for a device
    pub async fn lookup(&self, device_id: &str) -> Option<Arc<dyn DeviceTransport>> {
        let devices = self.devices.read().await;
        devices.get(device_id).map(|e| e.transport.clone())
    }

    /// Sorted list of connected device ids
    pub async fn list_connected(&self) -> Vec<String> {
        sorted_ids(&*self.devices.read().await)
    }

    /// Refresh a device's last-activity timestamp
    pub async fn touch(&self, device_id: &str) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Status of every connected device, sorted by id
    pub async fn devices(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.read().await;
        let mut infos: Vec<DeviceInfo> = devices
            .iter()
            .map(|(id, entry)| DeviceInfo {
                device_id: id.clone(),
                connection_id: entry.transport.connection_id().to_string(),
                peer: entry.transport.peer(),
                connected_at: entry.connected_at,
                last_seen: entry.last_seen,
            })
            .collect();
        infos.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        infos
    }

    /// Get the number of connected devices
    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }
}

fn sorted_ids(devices: &HashMap<String, DeviceEntry>) -> Vec<String> {
    let mut ids: Vec<String> = devices.keys().cloned().collect();
    ids.sort();
    ids
}
