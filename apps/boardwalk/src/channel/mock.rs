use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use super::{
    ChannelError, ChannelState, Connector, FrameHandler, PushChannel, PushEndpoint, advance,
    next_channel_id,
};

/// In-memory push channel. Records what was sent and lets callers inject
/// inbound frames and state changes.
pub struct MockChannel {
    id: u64,
    endpoint: String,
    state: watch::Sender<ChannelState>,
    handler: Mutex<Option<Arc<dyn FrameHandler>>>,
    backlog: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            id: next_channel_id(),
            endpoint: endpoint.into(),
            state,
            handler: Mutex::new(None),
            backlog: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Complete the handshake.
    pub fn open(&self) -> bool {
        advance(&self.state, ChannelState::Open)
    }

    /// Simulate a remote close or transport error.
    pub fn drop_connection(&self) -> bool {
        advance(&self.state, ChannelState::Closed)
    }

    /// Hand `frame` to the registered handler, or queue it until one exists.
    pub fn deliver(&self, frame: impl Into<String>) {
        let frame = frame.into();
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler.on_frame(frame),
            None => self.backlog.lock().push(frame),
        }
    }

    /// Frames passed to `send`, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PushChannel for MockChannel {
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
        *self.handler.lock() = Some(handler.clone());
        let backlog = std::mem::take(&mut *self.backlog.lock());
        for frame in backlog {
            handler.on_frame(frame);
        }
    }

    fn send(&self, payload: String) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn close(&self) {
        advance(&self.state, ChannelState::Closed);
    }
}

/// Hands out [`MockChannel`]s and remembers every one it opened.
#[derive(Default)]
pub struct MockConnector {
    auto_open: bool,
    opened: Mutex<Vec<Arc<MockChannel>>>,
}

impl MockConnector {
    /// Channels stay in `Connecting` until the test opens them.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels complete their handshake immediately.
    pub fn auto_open() -> Self {
        Self {
            auto_open: true,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<Arc<MockChannel>> {
        self.opened.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<MockChannel>> {
        self.opened.lock().last().cloned()
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &PushEndpoint) -> Arc<dyn PushChannel> {
        let channel = Arc::new(MockChannel::new(endpoint.build_url()));
        if self.auto_open {
            channel.open();
        }
        self.opened.lock().push(channel.clone());
        channel
    }
}
