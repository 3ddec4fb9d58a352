//! USSD Relay Shared Protocol Types
//!
//! This crate provides the wire protocol types and the frame codec used
//! between remote devices and the relay hub.

pub mod codec;
pub mod protocol;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use protocol::{DeviceMessage, HubCommand};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol limits and defaults shared by the hub and devices
pub mod limits {
    /// Maximum size of a single frame body (1 MiB)
    pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

    /// Default tag applied to device replies that carry no kind
    pub const DEFAULT_REPLY_KIND: &str = "info";

    /// Prompt shown for a session before the device answers
    pub const SESSION_CONNECTING_PROMPT: &str = "Connecting to mobile network...";
}
