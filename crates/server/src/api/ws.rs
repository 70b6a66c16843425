//! WebSocket relay of runner status and harvest signals.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use cartrunner_core::{HarvestSignal, StatusEvent};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// WebSocket message sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    /// A runner status line.
    Status(StatusEvent),
    /// The solver should start or stop harvesting a site key.
    Harvest(HarvestSignal),
}

impl WsMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WsMessage::Status(_) => "status",
            WsMessage::Harvest(_) => "harvest",
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn lagged<T>(result: Result<T, broadcast::error::RecvError>) -> Option<Result<T, ()>> {
    match result {
        Ok(msg) => Some(Ok(msg)),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!("WebSocket client lagged, skipped {} messages", n);
            WS_LAG_EVENTS.inc();
            Some(Err(()))
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut status_rx = state.manager().subscribe();
    let mut harvest_rx = state.manager().collaborators().broker.subscribe();

    WS_CONNECTIONS_ACTIVE.inc();
    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                result = status_rx.recv() => lagged(result).map(|r| r.map(WsMessage::Status)),
                result = harvest_rx.recv() => lagged(result).map(|r| r.map(WsMessage::Harvest)),
            };
            let msg = match received {
                Some(Ok(msg)) => msg,
                // The client will catch up
                Some(Err(())) => continue,
                None => {
                    debug!("Broadcast channel closed");
                    break;
                }
            };

            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                    WS_MESSAGES_SENT.with_label_values(&[msg.kind()]).inc();
                }
                Err(e) => error!("Failed to serialize WsMessage: {}", e),
            }
        }
    });

    // Clients only ever close; everything else is ignored.
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => debug!("Received text message: {}", text),
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
