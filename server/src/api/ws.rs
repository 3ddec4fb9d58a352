//! Operator WebSocket: live event stream plus session control

use super::AppState;
use crate::error::HubError;
use crate::events::EndReason;
use crate::hub::Hub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Replies addressed only to the requesting operator
const REPLY_QUEUE: usize = 32;

/// Session control frames accepted from an operator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorRequest {
    StartUssd {
        #[serde(alias = "phone_id")]
        device_id: String,
        #[serde(alias = "ussd_code")]
        code: String,
    },
    UssdResponse {
        session_id: String,
        response: String,
    },
    EndUssd {
        session_id: String,
    },
}

impl OperatorRequest {
    /// Execute against the hub. Results reach observers as events.
    pub async fn execute(self, hub: &Hub) -> Result<(), HubError> {
        match self {
            OperatorRequest::StartUssd { device_id, code } => {
                hub.sessions.start_session(&device_id, &code).await?;
            }
            OperatorRequest::UssdResponse {
                session_id,
                response,
            } => {
                hub.sessions.respond(&session_id, &response).await?;
            }
            OperatorRequest::EndUssd { session_id } => {
                hub.sessions.end_session(&session_id, EndReason::User).await;
            }
        }
        Ok(())
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subscription = hub.events.subscribe();
    let observer = subscription.id;
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_QUEUE);

    info!(observer, "operator connected");

    let writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = subscription.receiver.recv() => match event {
                    Some(event) => match serde_json::to_string(&*event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(observer, error = %e, "failed to serialize event");
                            continue;
                        }
                    },
                    // Dropped by the broadcaster, usually after overflow
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let outcome = match serde_json::from_str::<OperatorRequest>(&text) {
            Ok(request) => {
                debug!(observer, ?request, "operator request");
                request.execute(&hub).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("Invalid request: {e}")),
        };

        if let Err(message) = outcome {
            let reply = json!({ "type": "error", "message": message }).to_string();
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    }

    hub.events.unsubscribe(observer);
    writer.abort();
    info!(observer, "operator disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::registry::DeviceTransport;
    use crate::testing::RecordingTransport;
    use std::sync::Arc;

    #[test]
    fn test_parse_requests() {
        let req: OperatorRequest =
            serde_json::from_str(r#"{"type":"start_ussd","device_id":"A1","code":"*100#"}"#).unwrap();
        assert_eq!(
            req,
            OperatorRequest::StartUssd {
                device_id: "A1".into(),
                code: "*100#".into()
            }
        );

        let req: OperatorRequest =
            serde_json::from_str(r#"{"type":"start_ussd","phone_id":"A1","ussd_code":"*100#"}"#).unwrap();
        assert!(matches!(req, OperatorRequest::StartUssd { .. }));

        let req: OperatorRequest =
            serde_json::from_str(r#"{"type":"end_ussd","session_id":"s1"}"#).unwrap();
        assert_eq!(req, OperatorRequest::EndUssd { session_id: "s1".into() });

        assert!(serde_json::from_str::<OperatorRequest>(r#"{"type":"reboot"}"#).is_err());
    }

    #[tokio::test]
    async fn test_execute_session_requests() {
        let hub = Hub::new(&HubConfig::default());
        let transport = RecordingTransport::new();
        let as_dyn: Arc<dyn DeviceTransport> = transport.clone();
        hub.registry.register("A1", as_dyn).await;

        OperatorRequest::StartUssd {
            device_id: "A1".into(),
            code: "*100#".into(),
        }
        .execute(&hub)
        .await
        .unwrap();

        let session = hub.sessions.session_for_device("A1").await.unwrap();
        let err = OperatorRequest::UssdResponse {
            session_id: session.session_id.clone(),
            response: "1".into(),
        }
        .execute(&hub)
        .await
        .unwrap_err();
        assert_eq!(err, HubError::SessionNotActive(session.session_id.clone()));

        // Ending twice is fine
        for _ in 0..2 {
            OperatorRequest::EndUssd {
                session_id: session.session_id.clone(),
            }
            .execute(&hub)
            .await
            .unwrap();
        }
        assert_eq!(hub.sessions.count().await, 0);
    }

    #[tokio::test]
    async fn test_execute_against_unknown_device() {
        let hub = Hub::new(&HubConfig::default());
        let err = OperatorRequest::StartUssd {
            device_id: "ghost".into(),
            code: "*100#".into(),
        }
        .execute(&hub)
        .await
        .unwrap_err();
        assert_eq!(err, HubError::DeviceNotFound("ghost".into()));
    }
}
