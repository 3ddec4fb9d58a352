//! Wiring of the hub components and the per-device message handler

use crate::broadcast::EventBroadcaster;
use crate::command::CommandDispatcher;
use crate::config::HubConfig;
use crate::events::EndReason;
use crate::registry::{ConnectionId, ConnectionRegistry, DeviceTransport};
use crate::ussd::{SessionManager, SessionSweeper};
use relay_shared::DeviceMessage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Shared state of a running hub
pub struct Hub {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub sessions: Arc<SessionManager>,
    pub events: Arc<EventBroadcaster>,
    started_at: Instant,
}

impl Hub {
    pub fn new(config: &HubConfig) -> Arc<Self> {
        let events = Arc::new(EventBroadcaster::new(config.observer_queue_capacity));
        let registry = Arc::new(ConnectionRegistry::new(events.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            registry.clone(),
            events.clone(),
            config.command_log_capacity,
        ));
        let sessions = Arc::new(SessionManager::new(
            registry.clone(),
            dispatcher.clone(),
            events.clone(),
            config.terminal_matcher(),
            config.terminal_grace(),
        ));

        Arc::new(Self {
            registry,
            dispatcher,
            sessions,
            events,
            started_at: Instant::now(),
        })
    }

    /// Background task ending idle sessions
    pub fn sweeper(&self, config: &HubConfig) -> SessionSweeper {
        SessionSweeper::new(
            self.sessions.clone(),
            config.sweep_interval(),
            config.idle_timeout(),
        )
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Handle one message read from a device connection.
    ///
    /// `registered` is the id this connection last registered as; traffic
    /// before the first `register` is dropped.
    pub async fn on_device_message(
        &self,
        transport: &Arc<dyn DeviceTransport>,
        registered: &mut Option<String>,
        message: DeviceMessage,
    ) {
        match message {
            DeviceMessage::Register { device_id } => {
                if self.registry.register(&device_id, transport.clone()).await {
                    *registered = Some(device_id);
                }
            }
            DeviceMessage::MessageResponse { message, kind } => {
                let Some(device_id) = registered.as_deref() else {
                    debug!(conn = %transport.connection_id(), "reply before register, ignoring");
                    return;
                };
                self.registry.touch(device_id).await;
                self.dispatcher.record_inbound(device_id, &message, &kind).await;
            }
            DeviceMessage::UssdUpdate {
                session_id,
                response,
            } => {
                let Some(device_id) = registered.as_deref() else {
                    debug!(conn = %transport.connection_id(), "session update before register, ignoring");
                    return;
                };
                self.registry.touch(device_id).await;
                if let Err(e) = self.sessions.update_session(&session_id, &response).await {
                    debug!(device = device_id, session = %session_id, error = %e, "dropping session update");
                }
            }
        }
    }

    /// Remove everything bound to a closed transport
    pub async fn device_disconnected(&self, connection: ConnectionId) {
        let removed = self.registry.unregister(connection).await;
        if removed.is_empty() {
            debug!(conn = %connection, "unregistered connection closed");
        }
        for device_id in removed {
            if let Some(session) = self
                .sessions
                .end_device_session(&device_id, EndReason::DeviceDisconnected)
                .await
            {
                info!(device = %device_id, session = %session.session_id, "session closed with device");
            }
        }
    }

    /// Operator-facing summary
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            uptime_secs: self.uptime_secs(),
            devices: self.registry.count().await,
            sessions: self.sessions.count().await,
            observers: self.events.observer_count(),
            overflows: self.events.overflow_count(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub devices: usize,
    pub sessions: usize,
    pub observers: usize,
    /// Observers disconnected for falling behind since startup
    pub overflows: u64,
}
