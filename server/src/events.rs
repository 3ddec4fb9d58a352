//! Events pushed to operators through the broadcaster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an interactive session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// Operator asked for it
    User,
    /// The device's prompt contained a completion marker
    TerminalContent,
    /// The owning device's transport closed
    DeviceDisconnected,
    /// No update arrived within the idle threshold
    Timeout,
    /// A new session was started for the same device
    Superseded,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::User => "user",
            EndReason::TerminalContent => "terminal-content",
            EndReason::DeviceDisconnected => "device-disconnected",
            EndReason::Timeout => "timeout",
            EndReason::Superseded => "superseded",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event fanned out to every subscribed observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// Full list of connected device ids after a registry change
    MembershipChanged { devices: Vec<String> },
    /// Human-readable traffic line for a device
    NewMessage {
        device_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// Raw reply payload from a device
    CommandResponse { device_id: String, response: String },
    SessionStarted {
        session_id: String,
        device_id: String,
        code: String,
        prompt: String,
        options: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    SessionUpdated {
        session_id: String,
        device_id: String,
        prompt: String,
        options: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    SessionEnded {
        session_id: String,
        device_id: String,
        prompt: String,
        reason: EndReason,
        timestamp: DateTime<Utc>,
    },
}

impl HubEvent {
    /// Wire name of the event, as used in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            HubEvent::MembershipChanged { .. } => "membership_changed",
            HubEvent::NewMessage { .. } => "new_message",
            HubEvent::CommandResponse { .. } => "command_response",
            HubEvent::SessionStarted { .. } => "session_started",
            HubEvent::SessionUpdated { .. } => "session_updated",
            HubEvent::SessionEnded { .. } => "session_ended",
        }
    }
}
