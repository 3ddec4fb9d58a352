//! Session manager for interactive USSD dialogues

use super::options::TerminalMatcher;
use super::session::{InteractiveSession, SessionIdGenerator, SessionSnapshot};
use crate::broadcast::EventBroadcaster;
use crate::command::CommandDispatcher;
use crate::error::{HubError, Result};
use crate::events::{EndReason, HubEvent};
use crate::gate::DeviceGates;
use crate::registry::ConnectionRegistry;
use chrono::Utc;
use relay_shared::HubCommand;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Active sessions, indexed both ways so the one-per-device rule can be
/// enforced inside a single critical section.
#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, InteractiveSession>,
    by_device: HashMap<String, String>,
}

impl SessionTable {
    fn insert(&mut self, session: InteractiveSession) {
        self.by_device
            .insert(session.device_id.clone(), session.session_id.clone());
        self.sessions.insert(session.session_id.clone(), session);
    }

    fn remove(&mut self, session_id: &str) -> Option<InteractiveSession> {
        let session = self.sessions.remove(session_id)?;
        if self.by_device.get(&session.device_id).map(String::as_str) == Some(session_id) {
            self.by_device.remove(&session.device_id);
        }
        Some(session)
    }

    fn remove_device(&mut self, device_id: &str) -> Option<InteractiveSession> {
        let session_id = self.by_device.remove(device_id)?;
        self.sessions.remove(&session_id)
    }
}

/// Owns every interactive session and drives its state machine.
///
/// At most one session per device is ever `Starting` or `Active`; starting a
/// new one supersedes the old. Ending is idempotent from every path.
///
/// Every operation that changes a device's session holds that device's
/// gate from first table access to last published event. The gate is always
/// taken before the table lock, never while holding it.
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    events: Arc<EventBroadcaster>,
    table: Mutex<SessionTable>,
    gates: DeviceGates,
    ids: SessionIdGenerator,
    terminal: TerminalMatcher,
    terminal_grace: Duration,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<CommandDispatcher>,
        events: Arc<EventBroadcaster>,
        terminal: TerminalMatcher,
        terminal_grace: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            events,
            table: Mutex::new(SessionTable::default()),
            gates: DeviceGates::new(),
            ids: SessionIdGenerator::new(),
            terminal,
            terminal_grace,
        }
    }

    /// Start a session on a registered device, superseding any running one
    pub async fn start_session(&self, device_id: &str, code: &str) -> Result<SessionSnapshot> {
        if self.registry.lookup(device_id).await.is_none() {
            return Err(HubError::DeviceNotFound(device_id.to_string()));
        }

        let _gate = self.gates.lock(device_id).await;
        let session = InteractiveSession::new(self.ids.next(device_id), device_id, code);
        let snapshot = session.snapshot();
        let session_id = snapshot.session_id.clone();

        let superseded = {
            let mut table = self.table.lock().await;
            let previous = table.remove_device(device_id);
            table.insert(session);
            previous
        };

        if let Some(previous) = superseded {
            info!(
                device = device_id,
                old = %previous.session_id,
                new = %session_id,
                "superseding running session"
            );
            self.finish(previous, EndReason::Superseded).await;
        }

        if let Err(e) = self
            .dispatcher
            .forward(device_id, &HubCommand::ussd_start(&session_id, code))
            .await
        {
            self.table.lock().await.remove(&session_id);
            warn!(device = device_id, session = %session_id, error = %e, "session start failed");
            return Err(e);
        }

        info!(device = device_id, session = %session_id, code, "session started");
        self.events.publish(HubEvent::SessionStarted {
            session_id: session_id.clone(),
            device_id: device_id.to_string(),
            code: code.to_string(),
            prompt: snapshot.prompt.clone(),
            options: snapshot.options.clone(),
            timestamp: Utc::now(),
        });

        Ok(snapshot)
    }

    /// Apply a prompt reported by the device.
    ///
    /// Moves `Starting` to `Active`. A prompt containing a terminal marker
    /// schedules the session's end after the grace delay.
    pub async fn update_session(
        self: &Arc<Self>,
        session_id: &str,
        prompt: &str,
    ) -> Result<SessionSnapshot> {
        let device_id = self
            .device_of(session_id)
            .await
            .ok_or_else(|| HubError::SessionNotActive(session_id.to_string()))?;
        let _gate = self.gates.lock(&device_id).await;

        // The session may have ended while we waited for the gate
        let snapshot = {
            let mut table = self.table.lock().await;
            let session = table
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| HubError::SessionNotActive(session_id.to_string()))?;
            session.apply_update(prompt);
            session.snapshot()
        };

        debug!(session = session_id, options = snapshot.options.len(), "session updated");
        self.events.publish(HubEvent::SessionUpdated {
            session_id: session_id.to_string(),
            device_id: snapshot.device_id.clone(),
            prompt: snapshot.prompt.clone(),
            options: snapshot.options.clone(),
            timestamp: Utc::now(),
        });

        if let Some(marker) = self.terminal.matches(prompt) {
            info!(session = session_id, marker, "terminal prompt, ending after grace delay");
            let manager = Arc::clone(self);
            let session_id = session_id.to_string();
            let grace = self.terminal_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                manager.end_session(&session_id, EndReason::TerminalContent).await;
            });
        }

        Ok(snapshot)
    }

    /// Forward operator input into an active session. Does not change state.
    pub async fn respond(&self, session_id: &str, input: &str) -> Result<()> {
        let device_id = {
            let table = self.table.lock().await;
            match table.sessions.get(session_id) {
                Some(session) if session.is_active() => session.device_id.clone(),
                _ => return Err(HubError::SessionNotActive(session_id.to_string())),
            }
        };

        self.dispatcher
            .forward(&device_id, &HubCommand::ussd_response(session_id, input))
            .await
    }

    /// End a session. Returns `None` if it was already gone.
    pub async fn end_session(&self, session_id: &str, reason: EndReason) -> Option<SessionSnapshot> {
        if let Some(device_id) = self.device_of(session_id).await {
            let _gate = self.gates.lock(&device_id).await;
            let removed = self.table.lock().await.remove(session_id);
            if let Some(session) = removed {
                return Some(self.finish(session, reason).await);
            }
        }
        debug!(session = session_id, %reason, "session already ended");
        None
    }

    /// End whatever session the device is running
    pub async fn end_device_session(
        &self,
        device_id: &str,
        reason: EndReason,
    ) -> Option<SessionSnapshot> {
        let _gate = self.gates.lock(device_id).await;
        let removed = self.table.lock().await.remove_device(device_id);
        match removed {
            Some(session) => Some(self.finish(session, reason).await),
            None => None,
        }
    }

    /// End every session idle for longer than `threshold`; returns their ids
    pub async fn expire_idle(&self, threshold: Duration) -> Vec<String> {
        let candidates: Vec<(String, String)> = {
            let table = self.table.lock().await;
            table
                .sessions
                .values()
                .filter(|s| s.last_activity.elapsed() > threshold)
                .map(|s| (s.session_id.clone(), s.device_id.clone()))
                .collect()
        };

        let mut ended = Vec::with_capacity(candidates.len());
        for (session_id, device_id) in candidates {
            let _gate = self.gates.lock(&device_id).await;
            // Re-check: an update may have arrived since the scan
            let removed = {
                let mut table = self.table.lock().await;
                let still_idle = table
                    .sessions
                    .get(&session_id)
                    .is_some_and(|s| s.last_activity.elapsed() > threshold);
                if still_idle {
                    table.remove(&session_id)
                } else {
                    None
                }
            };
            if let Some(session) = removed {
                self.finish(session, EndReason::Timeout).await;
                ended.push(session_id);
            }
        }
        ended
    }

    async fn device_of(&self, session_id: &str) -> Option<String> {
        self.table
            .lock()
            .await
            .sessions
            .get(session_id)
            .map(|s| s.device_id.clone())
    }

    /// Teardown for a session already removed from the table
    async fn finish(&self, session: InteractiveSession, reason: EndReason) -> SessionSnapshot {
        if let Err(e) = self
            .dispatcher
            .forward(&session.device_id, &HubCommand::ussd_end(&session.session_id))
            .await
        {
            debug!(session = %session.session_id, error = %e, "end command not delivered");
        }

        info!(
            device = %session.device_id,
            session = %session.session_id,
            %reason,
            "session ended"
        );

        let snapshot = session.snapshot();
        self.events.publish(HubEvent::SessionEnded {
            session_id: session.session_id,
            device_id: session.device_id,
            prompt: session.prompt,
            reason,
            timestamp: Utc::now(),
        });
        snapshot
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.table
            .lock()
            .await
            .sessions
            .get(session_id)
            .map(InteractiveSession::snapshot)
    }

    pub async fn session_for_device(&self, device_id: &str) -> Option<SessionSnapshot> {
        let table = self.table.lock().await;
        table
            .by_device
            .get(device_id)
            .and_then(|id| table.sessions.get(id))
            .map(InteractiveSession::snapshot)
    }

    /// All live sessions, oldest first
    pub async fn active_sessions(&self) -> Vec<SessionSnapshot> {
        let table = self.table.lock().await;
        let mut sessions: Vec<SessionSnapshot> =
            table.sessions.values().map(InteractiveSession::snapshot).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub async fn count(&self) -> usize {
        self.table.lock().await.sessions.len()
    }
}
