//! Test doubles shared by the unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_shared::HubCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::registry::{ConnectionId, DeviceTransport};

/// Transport spy that records every command written to it
pub struct RecordingTransport {
    id: ConnectionId,
    sent: Mutex<Vec<HubCommand>>,
    failing: AtomicBool,
    closed: AtomicBool,
    delay: Mutex<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Commands successfully written so far
    pub fn sent(&self) -> Vec<HubCommand> {
        self.sent.lock().clone()
    }

    /// Make subsequent writes fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every write take `delay` before it lands
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceTransport for RecordingTransport {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        format!("spy:{}", self.id)
    }

    async fn send(&self, command: &HubCommand) -> Result<(), TransportError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(command.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
