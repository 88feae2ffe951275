use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{
    ChannelError, ChannelState, Connector, FrameHandler, PushChannel, PushEndpoint, advance,
    next_channel_id,
};

type HandlerSlot = Arc<RwLock<Option<Arc<dyn FrameHandler>>>>;

/// How long `close` waits for the relay to answer our Close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Opens [`WebSocketChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, endpoint: &PushEndpoint) -> Arc<dyn PushChannel> {
        WebSocketChannel::open(endpoint)
    }
}

/// Push channel over a WebSocket. Inbound text frames are queued until a
/// handler is registered, then dispatched in arrival order.
pub struct WebSocketChannel {
    id: u64,
    state: Arc<watch::Sender<ChannelState>>,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    handler: HandlerSlot,
    ws_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Start connecting to `endpoint`. Returns at once in `Connecting`.
    pub fn open(endpoint: &PushEndpoint) -> Arc<Self> {
        let id = next_channel_id();
        let (state_tx, _) = watch::channel(ChannelState::Connecting);
        let state = Arc::new(state_tx);

        // Create channels for bidirectional communication
        let (tx_out, rx_out) = mpsc::unbounded_channel::<Message>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();

        let url = endpoint.url();
        let task_state = state.clone();
        let ws_task = tokio::spawn(async move {
            let url = match url {
                Ok(url) => url,
                Err(err) => {
                    warn!(target: "boardwalk::channel", channel_id = id, error = %err, "cannot open push channel");
                    advance(&task_state, ChannelState::Closed);
                    return;
                }
            };

            debug!(target: "boardwalk::channel", channel_id = id, url = %url, "connecting push channel");
            let ws_stream = match connect_async(url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(err) => {
                    warn!(target: "boardwalk::channel", channel_id = id, url = %url, error = %err, "push handshake failed");
                    advance(&task_state, ChannelState::Closed);
                    return;
                }
            };

            // Closed while the handshake was in flight
            if !advance(&task_state, ChannelState::Open) {
                return;
            }
            info!(target: "boardwalk::channel", channel_id = id, url = %url, "push channel open");

            handle_websocket(id, ws_stream, rx_out, tx_in).await;

            if advance(&task_state, ChannelState::Closed) {
                info!(target: "boardwalk::channel", channel_id = id, "push channel closed by remote");
            }
        });

        Arc::new(Self {
            id,
            state,
            outbound: tx_out,
            inbound: Mutex::new(Some(rx_in)),
            handler: Arc::new(RwLock::new(None)),
            ws_task: Mutex::new(Some(ws_task)),
            dispatch_task: Mutex::new(None),
        })
    }
}

#[async_trait]
impl PushChannel for WebSocketChannel {
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    fn on_message(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write() = Some(handler);

        let Some(mut inbound) = self.inbound.lock().take() else {
            // Dispatcher already running; it picks up the new handler.
            return;
        };
        let slot = self.handler.clone();
        let id = self.id;
        let task = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let handler = slot.read().clone();
                match handler {
                    Some(handler) => handler.on_frame(frame),
                    None => debug!(target: "boardwalk::channel", channel_id = id, "frame dropped without handler"),
                }
            }
        });
        *self.dispatch_task.lock() = Some(task);
    }

    fn send(&self, payload: String) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        self.outbound
            .send(Message::Text(payload))
            .map_err(|_| ChannelError::NotOpen(ChannelState::Closed))
    }

    async fn close(&self) {
        let was_open = self.state() == ChannelState::Open;
        if advance(&self.state, ChannelState::Closed) {
            info!(target: "boardwalk::channel", channel_id = self.id, "push channel closed");
        }
        if was_open {
            // The writer sends this and stops; the reader ends on the reply.
            let _ = self.outbound.send(Message::Close(None));
        }

        let task = self.ws_task.lock().take();
        if let Some(mut task) = task {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                debug!(target: "boardwalk::channel", channel_id = self.id, "no close reply; dropping socket");
                task.abort();
                let _ = task.await;
            }
        }
        let dispatch = self.dispatch_task.lock().take();
        if let Some(task) = dispatch {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Pump frames between the socket and the channel queues until either side ends.
async fn handle_websocket(
    id: u64,
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<Message>,
    tx_in: mpsc::UnboundedSender<String>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Forward outgoing frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx_out.recv().await {
            let closing = message.is_close();
            if let Err(err) = ws_sender.send(message).await {
                warn!(target: "boardwalk::channel", channel_id = id, error = %err, "push send failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if tx_in.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    if tx_in.send(text).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(target: "boardwalk::channel", channel_id = id, error = %err, "dropping non-utf8 binary frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(target: "boardwalk::channel", channel_id = id, error = %err, "push transport error");
                break;
            }
            _ => {} // Ping, Pong, raw frames
        }
    }

    send_task.abort();
    let _ = send_task.await;
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }
    }
}
