use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub mod config;
pub mod mock;
pub mod websocket;

pub use config::PushEndpoint;
pub use mock::{MockChannel, MockConnector};
pub use websocket::{WebSocketChannel, WebSocketConnector};

/// Lifecycle of one push connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("push channel is not open (state: {0:?})")]
    NotOpen(ChannelState),
    #[error("invalid push endpoint {0}")]
    InvalidEndpoint(String),
}

/// Receives every inbound text frame, unparsed.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, frame: String);
}

impl<F> FrameHandler for F
where
    F: Fn(String) + Send + Sync,
{
    fn on_frame(&self, frame: String) {
        (self)(frame)
    }
}

/// Handle to a single logical push connection. Reconnecting produces a new
/// instance with a new id; instances are never resumed.
#[async_trait]
pub trait PushChannel: Send + Sync {
    fn id(&self) -> u64;

    fn state(&self) -> ChannelState;

    /// Observe state transitions.
    fn state_changes(&self) -> watch::Receiver<ChannelState>;

    /// Register the inbound frame handler. Frames that arrived earlier are
    /// replayed to it in order.
    fn on_message(&self, handler: Arc<dyn FrameHandler>);

    /// Fire-and-forget transmission of one text frame.
    fn send(&self, payload: String) -> Result<(), ChannelError>;

    async fn close(&self);
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_channel_id() -> u64 {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Moves `state` forward to `next`. Returns false for illegal transitions
/// (anything out of `Closed`, or `Open` → `Connecting`).
pub(crate) fn advance(state: &watch::Sender<ChannelState>, next: ChannelState) -> bool {
    state.send_if_modified(|current| {
        let allowed = matches!(
            (*current, next),
            (ChannelState::Connecting, ChannelState::Open)
                | (ChannelState::Connecting, ChannelState::Closed)
                | (ChannelState::Open, ChannelState::Closed)
        );
        if allowed {
            *current = next;
        }
        allowed
    })
}

/// Opens push channels. `open` returns immediately in `Connecting`.
pub trait Connector: Send + Sync {
    fn open(&self, endpoint: &PushEndpoint) -> Arc<dyn PushChannel>;
}

/// Resilience hook for the sync engine. Disabled unless configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before reconnect attempt `attempt` (1-based), or `None` once the
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self.backoff.saturating_mul(factor);
        Some(delay.min(self.max_backoff))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}
