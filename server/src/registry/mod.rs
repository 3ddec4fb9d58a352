//! Connection registry for tracking reachable devices
//!
//! This module handles:
//! - Mapping device ids to their live transport handle
//! - Replacing stale registrations on reconnect
//! - Membership-changed notifications
//! - Reading frames from device connections

mod connection;
mod manager;

pub use connection::{ConnectionId, DeviceConnection, DeviceTransport, TcpDeviceHandle};
pub use manager::{ConnectionRegistry, DeviceInfo};
