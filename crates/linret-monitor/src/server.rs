//! The web server and WebSocket logic, backed by axum.

use crate::model::DiagnosticSnapshot;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use log::{error, info, trace};
use std::net::SocketAddr;
use tokio::sync::broadcast;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) snapshot_tx: broadcast::Sender<DiagnosticSnapshot>,
}

/// Binds to `addr` and serves the root page plus the `/ws` diagnostic feed.
pub(super) async fn start_web_server(addr: SocketAddr, snapshot_tx: broadcast::Sender<DiagnosticSnapshot>) {
    let app_state = AppState { snapshot_tx };

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(websocket_handler))
        .with_state(app_state);

    info!("monitor listening on http://{addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind monitor to {addr}: {e}");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("monitor web server error: {e}");
    }
}

async fn root_handler() -> impl IntoResponse {
    Html(include_str!("web/monitor.html"))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("monitor client connected");
    let mut snapshot_rx = state.snapshot_tx.subscribe();

    loop {
        tokio::select! {
            Ok(snapshot) = snapshot_rx.recv() => {
                trace!("forwarding snapshot to monitor client");
                match serde_json::to_string(&snapshot) {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            info!("monitor client disconnected (send error)");
                            break;
                        }
                    }
                    Err(e) => error!("failed to serialize snapshot: {e}"),
                }
            }
            Some(Ok(msg)) = socket.recv() => {
                if let Message::Close(_) = msg {
                    info!("monitor client disconnected (close)");
                    break;
                }
            }
            else => {
                info!("monitor client disconnected (channel closed)");
                break;
            }
        }
    }
}
