//! Command dispatcher for sending commands to devices

use super::log::{CommandLog, CommandRecord, Direction};
use crate::broadcast::EventBroadcaster;
use crate::error::{HubError, Result};
use crate::events::HubEvent;
use crate::gate::DeviceGates;
use crate::registry::ConnectionRegistry;
use relay_shared::HubCommand;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind tag stored on outgoing records
const OUTGOING_KIND: &str = "command";

/// Result of a single `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Written to the device's transport
    Delivered { sequence: u64 },
    /// No device with that id is connected; nothing was recorded
    NotFound,
    /// The transport write failed; the device stays registered
    TransportError(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }

    /// Convert into the hub error taxonomy
    pub fn into_result(self, device_id: &str) -> Result<u64> {
        match self {
            DispatchOutcome::Delivered { sequence } => Ok(sequence),
            DispatchOutcome::NotFound => Err(HubError::DeviceNotFound(device_id.to_string())),
            DispatchOutcome::TransportError(reason) => Err(HubError::Dispatch {
                device_id: device_id.to_string(),
                reason,
            }),
        }
    }
}

/// Routes operator commands to devices and republishes traffic to observers
pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
    log: CommandLog,
    events: Arc<EventBroadcaster>,
    /// Keeps sequence order and wire order the same per device
    gates: DeviceGates,
}

impl CommandDispatcher {
    /// Create a new command dispatcher
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventBroadcaster>,
        log_capacity: usize,
    ) -> Self {
        Self {
            registry,
            log: CommandLog::new(log_capacity),
            events,
            gates: DeviceGates::new(),
        }
    }

    /// Send an opaque command to a specific device.
    ///
    /// Failures are not retried and never unregister the device; the
    /// transport's own close signal takes care of liveness.
    pub async fn send(&self, device_id: &str, command: &str) -> DispatchOutcome {
        let Some(transport) = self.registry.lookup(device_id).await else {
            debug!(device = device_id, "send to unknown device");
            return DispatchOutcome::NotFound;
        };

        let record = {
            let _gate = self.gates.lock(device_id).await;
            let record = self
                .log
                .append(device_id, Direction::Outgoing, OUTGOING_KIND, command)
                .await;

            if let Err(e) = transport
                .send(&HubCommand::shell(command, record.sequence))
                .await
            {
                warn!(device = device_id, seq = record.sequence, error = %e, "command dispatch failed");
                return DispatchOutcome::TransportError(e.to_string());
            }
            record
        };

        self.registry.touch(device_id).await;
        info!(device = device_id, seq = record.sequence, "command delivered");

        self.events.publish(HubEvent::NewMessage {
            device_id: device_id.to_string(),
            message: format!("Command: {command}"),
            timestamp: record.timestamp,
        });

        DispatchOutcome::Delivered {
            sequence: record.sequence,
        }
    }

    /// Record a reply received from a device and notify observers.
    ///
    /// `kind` is passed through verbatim.
    pub async fn record_inbound(&self, device_id: &str, payload: &str, kind: &str) -> CommandRecord {
        let record = self
            .log
            .append(device_id, Direction::Incoming, kind, payload)
            .await;

        debug!(device = device_id, seq = record.sequence, kind, "reply recorded");

        self.events.publish(HubEvent::NewMessage {
            device_id: device_id.to_string(),
            message: format!("{}: {}", kind.to_uppercase(), payload),
            timestamp: record.timestamp,
        });
        self.events.publish(HubEvent::CommandResponse {
            device_id: device_id.to_string(),
            response: payload.to_string(),
        });

        record
    }

    /// Write a protocol command to a device without logging it
    pub async fn forward(&self, device_id: &str, command: &HubCommand) -> Result<()> {
        let transport = self
            .registry
            .lookup(device_id)
            .await
            .ok_or_else(|| HubError::DeviceNotFound(device_id.to_string()))?;

        transport.send(command).await.map_err(|e| HubError::Dispatch {
            device_id: device_id.to_string(),
            reason: e.to_string(),
        })?;

        self.registry.touch(device_id).await;
        debug!(device = device_id, command = command.command(), "forwarded");
        Ok(())
    }

    /// Retained command history for a device
    pub async fn history(&self, device_id: &str) -> Vec<CommandRecord> {
        self.log.history(device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventBroadcaster>,
        dispatcher: CommandDispatcher,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(EventBroadcaster::new(64));
        let registry = Arc::new(ConnectionRegistry::new(events.clone()));
        let dispatcher = CommandDispatcher::new(registry.clone(), events.clone(), 100);
        Fixture {
            registry,
            events,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_send_ping_to_registered_device() {
        let f = fixture();
        let transport = RecordingTransport::new();
        f.registry.register("A1", transport.clone()).await;
        let mut sub = f.events.subscribe();

        let outcome = f.dispatcher.send("A1", "ping").await;
        assert_eq!(outcome, DispatchOutcome::Delivered { sequence: 1 });

        let history = f.dispatcher.history("A1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "ping");
        assert_eq!(history[0].direction, Direction::Outgoing);

        assert_eq!(transport.sent(), vec![HubCommand::shell("ping", 1)]);

        match &*sub.receiver.recv().await.unwrap() {
            HubEvent::NewMessage { device_id, message, .. } => {
                assert_eq!(device_id, "A1");
                assert_eq!(message, "Command: ping");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_device_has_no_side_effects() {
        let f = fixture();
        let mut sub = f.events.subscribe();

        let outcome = f.dispatcher.send("ghost", "ping").await;
        assert_eq!(outcome, DispatchOutcome::NotFound);
        assert!(f.dispatcher.history("ghost").await.is_empty());
        assert!(sub.receiver.try_recv().is_err());
        assert_eq!(
            outcome.into_result("ghost"),
            Err(HubError::DeviceNotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_send_uses_newest_handle_after_reregistration() {
        let f = fixture();
        let old = RecordingTransport::new();
        let new = RecordingTransport::new();
        f.registry.register("A1", old.clone()).await;
        f.registry.register("A1", new.clone()).await;

        assert!(f.dispatcher.send("A1", "ping").await.is_delivered());
        assert!(old.sent().is_empty());
        assert_eq!(new.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_device_registered() {
        let f = fixture();
        let transport = RecordingTransport::new();
        transport.set_failing(true);
        f.registry.register("A1", transport.clone()).await;
        let mut sub = f.events.subscribe();

        let outcome = f.dispatcher.send("A1", "reboot").await;
        assert!(matches!(outcome, DispatchOutcome::TransportError(_)));

        // Attempt is still logged, but nothing is broadcast
        assert_eq!(f.dispatcher.history("A1").await.len(), 1);
        assert!(sub.receiver.try_recv().is_err());
        assert_eq!(f.registry.list_connected().await, vec!["A1".to_string()]);
    }

    #[tokio::test]
    async fn test_record_inbound_passes_kind_through() {
        let f = fixture();
        let mut sub = f.events.subscribe();

        let record = f.dispatcher.record_inbound("A1", "pong", "weird-tag").await;
        assert_eq!(record.kind, "weird-tag");
        assert_eq!(record.direction, Direction::Incoming);

        match &*sub.receiver.recv().await.unwrap() {
            HubEvent::NewMessage { message, .. } => assert_eq!(message, "WEIRD-TAG: pong"),
            other => panic!("unexpected event: {:?}", other),
        }
        match &*sub.receiver.recv().await.unwrap() {
            HubEvent::CommandResponse { device_id, response } => {
                assert_eq!(device_id, "A1");
                assert_eq!(response, "pong");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_outgoing_commands_keep_call_order() {
        let f = fixture();
        let transport = RecordingTransport::new();
        f.registry.register("A1", transport.clone()).await;

        for cmd in ["one", "two", "three"] {
            assert!(f.dispatcher.send("A1", cmd).await.is_delivered());
        }
        let sent: Vec<String> = transport
            .sent()
            .iter()
            .map(|c| c.command().to_string())
            .collect();
        assert_eq!(sent, vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_reach_wire_in_sequence_order() {
        let f = Arc::new(fixture());
        let transport = RecordingTransport::new();
        f.registry.register("A1", transport.clone()).await;

        // First write is slow, the ones queued behind it are instant
        transport.set_delay(Duration::from_millis(100));
        let slow = {
            let f = f.clone();
            tokio::spawn(async move { f.dispatcher.send("A1", "one").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.set_delay(Duration::ZERO);

        let (two, three) = tokio::join!(f.dispatcher.send("A1", "two"), f.dispatcher.send("A1", "three"));
        assert_eq!(slow.await.unwrap(), DispatchOutcome::Delivered { sequence: 1 });
        assert_eq!(two, DispatchOutcome::Delivered { sequence: 2 });
        assert_eq!(three, DispatchOutcome::Delivered { sequence: 3 });

        assert_eq!(
            transport.sent(),
            vec![
                HubCommand::shell("one", 1),
                HubCommand::shell("two", 2),
                HubCommand::shell("three", 3),
            ]
        );
        let logged: Vec<u64> = f
            .dispatcher
            .history("A1")
            .await
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(logged, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_forward_to_unknown_device() {
        let f = fixture();
        let err = f
            .dispatcher
            .forward("ghost", &HubCommand::ussd_end("s"))
            .await
            .unwrap_err();
        assert_eq!(err, HubError::DeviceNotFound("ghost".into()));
    }
}
