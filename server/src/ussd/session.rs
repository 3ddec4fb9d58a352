//! Interactive session state

use super::options::quick_options;
use chrono::{DateTime, Utc};
use relay_shared::{limits::SESSION_CONNECTING_PROMPT, now_ms};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Lifecycle state of a live session. Ended sessions are removed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Start command sent, no prompt from the device yet
    Starting,
    /// At least one prompt received
    Active,
}

/// A multi-turn USSD dialogue with one device
#[derive(Debug, Clone)]
pub struct InteractiveSession {
    pub session_id: String,
    pub device_id: String,
    pub code: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Monotonic time of the last start/update, drives the idle sweep
    pub last_activity: Instant,
}

impl InteractiveSession {
    pub fn new(session_id: String, device_id: &str, code: &str) -> Self {
        Self {
            session_id,
            device_id: device_id.to_string(),
            code: code.to_string(),
            prompt: SESSION_CONNECTING_PROMPT.to_string(),
            options: Vec::new(),
            state: SessionState::Starting,
            started_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    /// Apply a prompt received from the device
    pub fn apply_update(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
        self.options = quick_options(prompt);
        self.state = SessionState::Active;
        self.last_activity = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            device_id: self.device_id.clone(),
            code: self.code.clone(),
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            state: self.state,
            started_at: self.started_at,
            idle_secs: self.last_activity.elapsed().as_secs(),
        }
    }
}

/// Read-only view of a session for callers outside the manager
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub device_id: String,
    pub code: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Issues `ussd_<device>_<millis>` ids.
///
/// The millisecond component is strictly increasing within the process, so
/// two sessions never share an id even when started in the same instant.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    last_ms: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, device_id: &str) -> String {
        let now = now_ms();
        let prev = self
            .last_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let stamp = now.max(prev + 1);
        format!("ussd_{device_id}_{stamp}")
    }
}
