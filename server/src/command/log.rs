//! Per-device append-only command history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Which way a record travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Hub -> device
    Outgoing,
    /// Device -> hub
    Incoming,
}

/// One dispatch attempt or reply; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub device_id: String,
    /// Per-device sequence number, starting at 1
    pub sequence: u64,
    pub direction: Direction,
    /// "command" for outgoing records, the device's tag for incoming ones
    pub kind: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct DeviceLog {
    last_sequence: u64,
    records: VecDeque<CommandRecord>,
}

/// Ordered log of command records, kept per device.
///
/// Only the newest `capacity` records are retained for each device;
/// sequence numbers keep increasing when older ones are dropped.
pub struct CommandLog {
    logs: RwLock<HashMap<String, DeviceLog>>,
    capacity: usize,
}

impl CommandLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a record and return it
    pub async fn append(
        &self,
        device_id: &str,
        direction: Direction,
        kind: &str,
        content: &str,
    ) -> CommandRecord {
        let mut logs = self.logs.write().await;
        let log = logs.entry(device_id.to_string()).or_default();
        log.last_sequence += 1;

        let record = CommandRecord {
            device_id: device_id.to_string(),
            sequence: log.last_sequence,
            direction,
            kind: kind.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        if log.records.len() == self.capacity {
            log.records.pop_front();
        }
        log.records.push_back(record.clone());
        record
    }

    /// Retained records for a device, oldest first
    pub async fn history(&self, device_id: &str) -> Vec<CommandRecord> {
        self.logs
            .read()
            .await
            .get(device_id)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }
}
