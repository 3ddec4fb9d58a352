//! Error types for the hub core

use thiserror::Error;

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Recoverable failures surfaced to operators. None of these are fatal to
/// the process or affect any other device's channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The operation referenced a device that is not connected
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Writing to the device's transport failed; the device stays registered
    #[error("Dispatch to {device_id} failed: {reason}")]
    Dispatch { device_id: String, reason: String },

    /// The operation referenced a session that is not active
    #[error("Session not active: {0}")]
    SessionNotActive(String),
}

/// Failure writing to a single transport handle
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Encode error: {0}")]
    Codec(#[from] relay_shared::codec::CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport closed")]
    Closed,
}
