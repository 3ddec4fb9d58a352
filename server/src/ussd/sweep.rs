//! Periodic expiry of idle sessions

use super::manager::SessionManager;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Ends sessions that received no update within the idle timeout
pub struct SessionSweeper {
    sessions: Arc<SessionManager>,
    check_interval: Duration,
    idle_timeout: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionManager>, check_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            sessions,
            check_interval,
            idle_timeout,
        }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let expired = self.sessions.expire_idle(self.idle_timeout).await;
            if expired.is_empty() {
                debug!("no idle sessions");
            } else {
                info!(count = expired.len(), "expired idle sessions");
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
