use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use sb_session::pty::Spawner;
use sb_session::{SessionManager, SessionSettings};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::connection::Connections;
use crate::gateway::Gateway;
use crate::handlers;
use crate::middleware::TracingMiddleware;
use crate::orchestrator::Orchestrator;
use crate::router::OutputRouter;

/// Default interval between WebSocket ping frames.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Everything the HTTP layer needs, shared across connections.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub manager: SessionManager,
    pub orchestrator: Arc<Orchestrator>,
    pub heartbeat: Duration,
}

impl AppState {
    /// Wire the session manager, orchestrator and gateway together.
    /// Must be called inside a Tokio runtime.
    pub fn build(
        settings: SessionSettings,
        spawner: Arc<dyn Spawner>,
        heartbeat: Duration,
    ) -> Arc<Self> {
        let connections = Connections::new();
        let manager = SessionManager::new(
            settings,
            spawner,
            Arc::new(OutputRouter::new(connections.clone())),
        );
        let orchestrator = Arc::new(Orchestrator::new(manager.clone()));

        let mut gateway = Gateway::new(connections, manager.max_sessions());
        gateway.use_middleware(Arc::new(TracingMiddleware));
        handlers::register_all(&mut gateway, orchestrator.clone());
        let orch = orchestrator.clone();
        gateway.on_disconnect(move |client| orch.on_disconnect(client.id()));

        Arc::new(Self {
            gateway: Arc::new(gateway),
            manager,
            orchestrator,
            heartbeat,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listening socket. Failure here is fatal for the daemon.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server failed")
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.manager.len(),
        "maxSessions": state.manager.max_sessions(),
        "connections": state.gateway.connections().len(),
    }))
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (client, outbound) = state.gateway.connect();
    let (mut sink, mut stream) = socket.split();

    // Queue -> socket, plus heartbeat pings to detect half-open connections.
    let heartbeat = state.heartbeat;
    let client_id = client.id();
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            tokio::select! {
                msg = outbound.recv_async() => {
                    let Ok(msg) = msg else { break };
                    let text = match msg.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%client_id, kind = msg.kind(), "failed to encode message: {e}");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        debug!(%client_id, "heartbeat failed, closing");
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => state.gateway.dispatch(&client, text.as_str()).await,
            Ok(Message::Binary(data)) => {
                let text = String::from_utf8_lossy(&data);
                state.gateway.dispatch(&client, &text).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%client_id, "websocket read error: {e}");
                break;
            }
        }
    }

    state.gateway.disconnect(&client);
    writer.abort();
}
