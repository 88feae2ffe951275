//! Relay backend for boardwalk chat clients.
//!
//! `GET /api/messages` serves the full transcript, `GET /ws` accepts one
//! JSON frame per composed message and fans every stored record (or a bare
//! change notice) out to all connected clients, the sender included.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use boardwalk_core::{Message, Notice, OutboundFrame, PayloadError};
use clap::ValueEnum;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod hub;
pub mod store;

pub use hub::Hub;
pub use store::MessageLog;

/// What connected clients receive after a message is stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum NotifyMode {
    /// The stored record itself.
    #[default]
    Full,
    /// A content-free `{"type":"changed"}` notice.
    Signal,
}

pub struct PierState {
    pub log: MessageLog,
    pub hub: Hub,
    pub notify: NotifyMode,
    /// Held from append to broadcast so fan-out order matches log order.
    relay: Mutex<()>,
}

impl PierState {
    pub fn new(notify: NotifyMode) -> Self {
        Self {
            log: MessageLog::new(),
            hub: Hub::new(),
            notify,
            relay: Mutex::new(()),
        }
    }

    /// Validate, store and fan out one inbound frame. Returns the number of
    /// connections it was queued for.
    pub fn accept(&self, text: &str) -> Result<usize, PayloadError> {
        let frame: OutboundFrame = serde_json::from_str(text)?;
        if frame.message.trim().is_empty() {
            return Err(PayloadError::EmptyBody);
        }

        // Broadcast only queues with `try_send`, so nothing awaits under the lock.
        let _relay = self.relay.lock();
        let record = self.log.append(frame);
        let payload = match self.notify {
            NotifyMode::Full => serde_json::to_string(&record)?,
            NotifyMode::Signal => serde_json::to_string(&Notice::Changed {
                total: self.log.len(),
            })?,
        };
        Ok(self.hub.broadcast(&payload))
    }
}

pub fn router(state: Arc<PierState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/messages", get(messages_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<PierState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// A pier running on a background task.
pub struct RunningPier {
    pub addr: SocketAddr,
    pub state: Arc<PierState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunningPier {
    pub fn server(&self) -> String {
        self.addr.to_string()
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for RunningPier {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bind `listen_addr` (port 0 picks a free port) and serve in the background.
pub async fn start(listen_addr: SocketAddr, notify: NotifyMode) -> std::io::Result<RunningPier> {
    let listener = TcpListener::bind(listen_addr).await?;
    let addr = listener.local_addr()?;
    let state = Arc::new(PierState::new(notify));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let serve_state = state.clone();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(err) = serve(listener, serve_state, shutdown).await {
            warn!(error = %err, "pier stopped with error");
        }
    });

    info!(%addr, ?notify, "boardwalk pier listening");
    Ok(RunningPier {
        addr,
        state,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn messages_handler(State(state): State<Arc<PierState>>) -> Json<Option<Vec<Message>>> {
    Json(state.log.snapshot())
}

async fn ws_handler(State(state): State<Arc<PierState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<PierState>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbound = state.hub.register(connection_id);
    info!(connection_id = %connection_id, connections = state.hub.len(), "client connected");

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                return;
            }
        }
        // The hub dropped this connection; tell the client so it reconnects.
        let _ = ws_tx.send(WsMessage::Close(None)).await;
        debug!(connection_id = %connection_id, "writer task finished");
    });

    loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            _ = &mut writer => {
                info!(connection_id = %connection_id, "outbound side closed");
                break;
            }
        };
        let Some(message) = message else { break };
        match message {
            Ok(WsMessage::Text(text)) => match state.accept(&text) {
                Ok(delivered) => {
                    debug!(connection_id = %connection_id, delivered, "message relayed");
                }
                Err(err) => {
                    warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "skipping malformed frame"
                    );
                }
            },
            Ok(WsMessage::Close(frame)) => {
                info!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving message");
                break;
            }
        }
    }

    let remaining = state.hub.unregister(connection_id);
    writer.abort();
    info!(connection_id = %connection_id, remaining, "client disconnected");
}
