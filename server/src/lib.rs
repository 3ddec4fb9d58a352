//! Relay hub: device connections, command dispatch and interactive USSD
//! sessions, exposed to operators over HTTP and WebSocket.

pub mod api;
pub mod broadcast;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
mod gate;
pub mod hub;
pub mod listener;
pub mod registry;
pub mod ussd;

#[cfg(test)]
mod testing;

pub use config::HubConfig;
pub use error::{HubError, Result};
pub use hub::Hub;
