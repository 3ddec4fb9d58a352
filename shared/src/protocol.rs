//! Messages exchanged between devices and the hub
//!
//! Device -> hub messages are tagged by `type`, hub -> device commands by
//! `action`. Both travel as JSON bodies inside length-prefixed frames.

use serde::{Deserialize, Serialize};

use crate::limits::DEFAULT_REPLY_KIND;

/// Command prefix asking the device to dial a USSD code
pub const USSD_START_PREFIX: &str = "start_ussd:";
/// Command prefix carrying the operator's answer inside a session
pub const USSD_RESPONSE_PREFIX: &str = "ussd_response:";
/// Command asking the device to close its USSD dialogue
pub const USSD_END: &str = "end_ussd";

/// A message sent by a device to the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Registration handshake; must be the first accepted message
    Register { device_id: String },
    /// Free-text reply to a command, tagged with a caller-chosen kind
    MessageResponse {
        message: String,
        #[serde(default = "default_kind")]
        kind: String,
    },
    /// New prompt text for an interactive session
    UssdUpdate { session_id: String, response: String },
}

fn default_kind() -> String {
    DEFAULT_REPLY_KIND.to_string()
}

/// A command pushed by the hub to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HubCommand {
    /// Opaque command text
    Shell { command: String, message_id: u64 },
    /// Session operation for an interactive USSD dialogue
    Ussd { command: String, session_id: String },
}

impl HubCommand {
    /// Create an opaque shell command
    pub fn shell(command: impl Into<String>, message_id: u64) -> Self {
        HubCommand::Shell {
            command: command.into(),
            message_id,
        }
    }

    /// Ask the device to start a USSD dialogue with `code`
    pub fn ussd_start(session_id: impl Into<String>, code: &str) -> Self {
        HubCommand::Ussd {
            command: format!("{USSD_START_PREFIX}{code}"),
            session_id: session_id.into(),
        }
    }

    /// Forward the operator's input to a running dialogue
    pub fn ussd_response(session_id: impl Into<String>, input: &str) -> Self {
        HubCommand::Ussd {
            command: format!("{USSD_RESPONSE_PREFIX}{input}"),
            session_id: session_id.into(),
        }
    }

    /// Ask the device to close a dialogue
    pub fn ussd_end(session_id: impl Into<String>) -> Self {
        HubCommand::Ussd {
            command: USSD_END.to_string(),
            session_id: session_id.into(),
        }
    }

    /// The command text carried by this message
    pub fn command(&self) -> &str {
        match self {
            HubCommand::Shell { command, .. } | HubCommand::Ussd { command, .. } => command,
        }
    }
}
