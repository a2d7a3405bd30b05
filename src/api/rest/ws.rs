use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::models::marker::MapView;
use crate::models::snapshot::DerivedStats;
use crate::state::AppState;

#[derive(Serialize)]
struct LiveFrame {
    stats: DerivedStats,
    map: MapView,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = WatchStream::new(state.console.watch_snapshots());

    info!("websocket client connected");

    let console = state.console.clone();
    let mut send_task = tokio::spawn(async move {
        // The first item is the current snapshot, then one per commit.
        while let Some(snapshot) = snapshots.next().await {
            let frame = LiveFrame {
                stats: snapshot.stats(),
                map: console.project(&snapshot),
            };
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize live frame for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    // The survivor would otherwise stay parked on its stream.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("websocket client disconnected");
}
