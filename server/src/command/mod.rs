//! Command dispatch and history for the hub
//!
//! This module handles:
//! - Routing operator commands to a specific device
//! - Recording outgoing commands and incoming replies per device
//! - Republishing traffic to observers

mod dispatcher;
mod log;

pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use log::{CommandLog, CommandRecord, Direction};
