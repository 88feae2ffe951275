//! Sync engine: one task that owns the transcript store and the composer and
//! handles every event (commands, push frames, snapshot results, channel
//! state changes, reconnect timers) sequentially.

use boardwalk_core::{AuthorshipPolicy, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{ChannelState, Connector, PushChannel, PushEndpoint, ReconnectPolicy};
use crate::compose::{Composer, EchoPolicy, Submission, SubmitError};
use crate::identity::IdentityCell;
use crate::snapshot::{FetchError, SnapshotSource};
use crate::transcript::{
    DEFAULT_ECHO_WINDOW, FrameOutcome, SnapshotOutcome, SnapshotTicket, SyncStrategy,
    TranscriptSnapshot, TranscriptStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    pub echo: EchoPolicy,
    pub authorship: AuthorshipPolicy,
    pub reconnect: ReconnectPolicy,
    pub echo_window: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::default(),
            echo: EchoPolicy::default(),
            authorship: AuthorshipPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            echo_window: DEFAULT_ECHO_WINDOW,
        }
    }
}

impl SyncOptions {
    pub fn with_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_echo(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_authorship(mut self, authorship: AuthorshipPolicy) -> Self {
        self.authorship = authorship;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Connection-level view published alongside the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub channel: Option<ChannelState>,
    pub reconnect_attempts: u32,
    pub snapshot_loaded: bool,
    pub last_error: Option<String>,
}

enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<Submission, SubmitError>>,
    },
    Refresh,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

type FrameEvent = (u64, String);
type FetchEvent = (SnapshotTicket, Result<Vec<Message>, FetchError>);

/// Start the engine on the current runtime.
pub fn spawn(
    options: SyncOptions,
    connector: Arc<dyn Connector>,
    endpoint: PushEndpoint,
    loader: Arc<dyn SnapshotSource>,
    identity: IdentityCell,
) -> SyncHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

    let store = TranscriptStore::new(options.strategy).with_echo_window(options.echo_window);
    let (transcript_tx, transcript_rx) = watch::channel(store.snapshot());
    let (status_tx, status_rx) = watch::channel(SyncStatus::default());

    let engine = Engine {
        options,
        connector,
        endpoint,
        loader,
        identity: identity.clone(),
        store,
        composer: Composer::new(options.echo),
        channel: None,
        channel_state: None,
        last_state: None,
        resync_on_open: false,
        attempt: 0,
        reconnect_at: None,
        fetch_task: None,
        frames_tx,
        fetch_tx,
        transcript_tx,
        status_tx,
    };
    let task = tokio::spawn(engine.run(commands_rx, frames_rx, fetch_rx));

    SyncHandle {
        commands: commands_tx,
        transcript: transcript_rx,
        status: status_rx,
        identity,
        authorship: options.authorship,
        task: Some(task),
    }
}

pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    transcript: watch::Receiver<TranscriptSnapshot>,
    status: watch::Receiver<SyncStatus>,
    identity: IdentityCell,
    authorship: AuthorshipPolicy,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub async fn submit(&self, text: impl Into<String>) -> Result<Submission, SubmitError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                text: text.into(),
                reply,
            })
            .map_err(|_| SubmitError::Stopped)?;
        response.await.map_err(|_| SubmitError::Stopped)?
    }

    /// Request a snapshot refresh. Coalesced with any fetch already running.
    pub fn refresh(&self) -> bool {
        self.commands.send(Command::Refresh).is_ok()
    }

    pub fn transcript(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.transcript.clone()
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn identity(&self) -> &IdentityCell {
        &self.identity
    }

    pub fn authorship(&self) -> AuthorshipPolicy {
        self.authorship
    }

    /// Close the channel and wait for the engine to exit.
    pub async fn shutdown(mut self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = finished.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Engine {
    options: SyncOptions,
    connector: Arc<dyn Connector>,
    endpoint: PushEndpoint,
    loader: Arc<dyn SnapshotSource>,
    identity: IdentityCell,
    store: TranscriptStore,
    composer: Composer,
    channel: Option<Arc<dyn PushChannel>>,
    channel_state: Option<watch::Receiver<ChannelState>>,
    last_state: Option<ChannelState>,
    resync_on_open: bool,
    attempt: u32,
    reconnect_at: Option<Instant>,
    fetch_task: Option<JoinHandle<()>>,
    frames_tx: mpsc::UnboundedSender<FrameEvent>,
    fetch_tx: mpsc::UnboundedSender<FetchEvent>,
    transcript_tx: watch::Sender<TranscriptSnapshot>,
    status_tx: watch::Sender<SyncStatus>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut frames: mpsc::UnboundedReceiver<FrameEvent>,
        mut fetches: mpsc::UnboundedReceiver<FetchEvent>,
    ) {
        info!(
            target: "boardwalk::sync",
            endpoint = %self.endpoint.build_url(),
            strategy = ?self.options.strategy,
            echo = ?self.options.echo,
            "sync engine starting"
        );
        self.open_channel();
        self.request_snapshot();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.teardown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some((channel_id, frame)) = frames.recv() => self.handle_frame(channel_id, frame),
                Some((ticket, result)) = fetches.recv() => self.handle_snapshot(ticket, result),
                state = next_state(&mut self.channel_state) => match state {
                    Some(state) => self.handle_state(state),
                    None => self.channel_state = None,
                },
                _ = deadline(self.reconnect_at) => self.reconnect(),
            }
        }
        debug!(target: "boardwalk::sync", "sync engine stopped");
    }

    fn open_channel(&mut self) {
        let channel = self.connector.open(&self.endpoint);
        let channel_id = channel.id();
        let frames = self.frames_tx.clone();
        channel.on_message(Arc::new(move |frame: String| {
            let _ = frames.send((channel_id, frame));
        }));

        let mut state = channel.state_changes();
        let initial = *state.borrow_and_update();
        debug!(target: "boardwalk::sync", channel = channel_id, "push channel opened");

        self.channel = Some(channel);
        self.channel_state = Some(state);
        self.last_state = None;
        self.handle_state(initial);
    }

    fn handle_state(&mut self, state: ChannelState) {
        if self.last_state == Some(state) {
            return;
        }
        self.last_state = Some(state);
        self.status_tx.send_modify(|status| status.channel = Some(state));

        match state {
            ChannelState::Connecting => {}
            ChannelState::Open => {
                info!(target: "boardwalk::sync", "push channel open");
                self.attempt = 0;
                if std::mem::take(&mut self.resync_on_open) {
                    // Frames sent while disconnected were never delivered.
                    self.request_snapshot();
                }
            }
            ChannelState::Closed => {
                self.attempt += 1;
                match self.options.reconnect.delay_for(self.attempt) {
                    Some(delay) => {
                        warn!(
                            target: "boardwalk::sync",
                            attempt = self.attempt,
                            delay_ms = delay.as_millis() as u64,
                            "push channel closed; reconnecting"
                        );
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    None => {
                        warn!(target: "boardwalk::sync", "push channel closed");
                        self.set_error("push channel closed".to_string());
                    }
                }
            }
        }
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        self.resync_on_open = true;
        self.status_tx
            .send_modify(|status| status.reconnect_attempts += 1);
        self.open_channel();
    }

    fn handle_frame(&mut self, channel_id: u64, frame: String) {
        let current = self.channel.as_ref().map(|channel| channel.id());
        if current != Some(channel_id) {
            debug!(
                target: "boardwalk::sync",
                channel = channel_id,
                current = ?current,
                "dropping frame from superseded channel"
            );
            return;
        }

        match self.store.apply_frame(&frame) {
            FrameOutcome::Appended | FrameOutcome::Confirmed(_) => self.publish(),
            FrameOutcome::Dropped(err) => self.set_error(err.to_string()),
            FrameOutcome::RefetchRequested => self.request_snapshot(),
        }
    }

    fn request_snapshot(&mut self) {
        let Some(ticket) = self.store.begin_snapshot() else {
            debug!(target: "boardwalk::sync", "snapshot already in flight; coalescing");
            return;
        };
        let loader = self.loader.clone();
        let results = self.fetch_tx.clone();
        self.fetch_task = Some(tokio::spawn(async move {
            let result = loader.fetch_snapshot().await;
            let _ = results.send((ticket, result));
        }));
    }

    fn handle_snapshot(&mut self, ticket: SnapshotTicket, result: Result<Vec<Message>, FetchError>) {
        let error = result.as_ref().err().map(|err| err.to_string());
        let outcome = self.store.apply_snapshot(ticket, result);
        match outcome {
            SnapshotOutcome::Applied { .. } => {
                self.status_tx.send_modify(|status| status.snapshot_loaded = true);
                self.publish();
            }
            SnapshotOutcome::Failed { .. } => {
                if let Some(error) = error {
                    self.set_error(error);
                }
            }
            SnapshotOutcome::Stale => {}
        }
        if outcome.follow_up() {
            self.request_snapshot();
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text, reply } => {
                let result = self.submit(&text);
                let _ = reply.send(result);
            }
            Command::Refresh => self.request_snapshot(),
            Command::Shutdown { .. } => {}
        }
    }

    fn submit(&mut self, text: &str) -> Result<Submission, SubmitError> {
        let identity = self.identity.current();
        let result = match self.channel.as_deref() {
            Some(channel) => self.composer.submit(text, identity.as_ref(), channel),
            None if text.trim().is_empty() => Err(SubmitError::EmptyInput),
            None if identity.is_none() => Err(SubmitError::Unauthenticated),
            None => Err(SubmitError::ChannelNotOpen),
        };
        if let Ok(Submission {
            echo: Some(echo), ..
        }) = &result
        {
            self.store.append_optimistic(echo.clone());
            self.publish();
        }
        result
    }

    async fn teardown(&mut self) {
        self.reconnect_at = None;
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.channel_state = None;
        self.status_tx
            .send_modify(|status| status.channel = Some(ChannelState::Closed));
    }

    fn publish(&self) {
        let snapshot = self.store.snapshot();
        self.transcript_tx.send_if_modified(|current| {
            if current.revision == snapshot.revision {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn set_error(&self, error: String) {
        self.status_tx
            .send_modify(|status| status.last_error = Some(error));
    }
}

async fn next_state(state: &mut Option<watch::Receiver<ChannelState>>) -> Option<ChannelState> {
    match state {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockConnector;
    use crate::snapshot::ScriptedSnapshot;
    use boardwalk_core::{Author, Notice, SessionIdentity, resolve};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn alice() -> SessionIdentity {
        SessionIdentity::new("u1").with_username("alice")
    }

    fn msg(id: &str, name: &str, body: &str) -> Message {
        Message::new(Author::new(id).with_username(name), body)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn transcript_where(
        handle: &SyncHandle,
        predicate: impl FnMut(&TranscriptSnapshot) -> bool,
    ) -> TranscriptSnapshot {
        let mut rx = handle.transcript();
        let snapshot = timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("transcript condition timed out")
            .expect("engine alive")
            .clone();
        snapshot
    }

    async fn status_where(
        handle: &SyncHandle,
        predicate: impl FnMut(&SyncStatus) -> bool,
    ) -> SyncStatus {
        let mut rx = handle.status();
        let status = timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("status condition timed out")
            .expect("engine alive")
            .clone();
        status
    }

    #[tokio::test]
    async fn direct_append_frame_is_attributed_to_session() {
        let connector = Arc::new(MockConnector::auto_open());
        let loader = Arc::new(ScriptedSnapshot::new(Vec::new()));
        let handle = spawn(
            SyncOptions::default(),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            loader.clone(),
            IdentityCell::signed_in(alice()),
        );
        status_where(&handle, |s| s.snapshot_loaded && s.channel == Some(ChannelState::Open))
            .await;

        let channel = connector.latest().expect("channel opened");
        channel.deliver(r#"{"user":{"id":"u1","username":"alice"},"message":"hi"}"#);

        let transcript = transcript_where(&handle, |t| t.len() == 1).await;
        let entry = &transcript.entries[0];
        assert_eq!(entry.message.body, "hi");
        let session = handle.identity().current();
        assert!(resolve(handle.authorship(), &entry.message, session.as_ref()).is_mine());

        handle.shutdown().await;
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn notice_triggers_exactly_one_refetch_and_replaces() {
        let connector = Arc::new(MockConnector::auto_open());
        let loader = Arc::new(ScriptedSnapshot::new(Vec::new()));
        loader.push_ok(vec![msg("u2", "bob", "one")]);
        let handle = spawn(
            SyncOptions::default().with_strategy(SyncStrategy::RefetchOnNotify),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            loader.clone(),
            IdentityCell::new(),
        );
        transcript_where(&handle, |t| t.len() == 1).await;
        status_where(&handle, |s| s.channel == Some(ChannelState::Open)).await;
        assert_eq!(loader.calls(), 1);

        let fresh = vec![msg("u2", "bob", "one"), msg("u1", "alice", "two")];
        loader.push_ok(fresh.clone());
        let notice = serde_json::to_string(&Notice::Changed { total: 2 }).expect("notice");
        connector.latest().expect("channel").deliver(notice);

        let transcript = transcript_where(&handle, |t| t.len() == 2).await;
        assert_eq!(transcript.messages().cloned().collect::<Vec<_>>(), fresh);
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_transcript() {
        let connector = Arc::new(MockConnector::auto_open());
        let loader = Arc::new(ScriptedSnapshot::new(Vec::new()));
        loader.push_ok(vec![msg("u2", "bob", "kept")]);
        loader.push_err(FetchError::Unavailable("relay down".into()));
        let handle = spawn(
            SyncOptions::default().with_strategy(SyncStrategy::RefetchOnNotify),
            connector,
            PushEndpoint::new("127.0.0.1:8080"),
            loader.clone(),
            IdentityCell::new(),
        );
        let before = transcript_where(&handle, |t| t.len() == 1).await;

        assert!(handle.refresh());
        let status = status_where(&handle, |s| s.last_error.is_some()).await;
        assert!(status.last_error.unwrap_or_default().contains("relay down"));

        let after = handle.transcript().borrow().clone();
        assert_eq!(after.revision, before.revision);
        assert_eq!(after.entries, before.entries);
    }

    #[tokio::test]
    async fn precondition_failures_never_send() {
        let connector = Arc::new(MockConnector::auto_open());
        let identity = IdentityCell::new();
        let handle = spawn(
            SyncOptions::default(),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            Arc::new(ScriptedSnapshot::default()),
            identity.clone(),
        );
        status_where(&handle, |s| s.channel == Some(ChannelState::Open)).await;
        let channel = connector.latest().expect("channel");

        assert_eq!(handle.submit("   ").await, Err(SubmitError::EmptyInput));
        assert_eq!(handle.submit("hello").await, Err(SubmitError::Unauthenticated));
        assert!(channel.sent().is_empty());

        identity.resolve(alice()).expect("resolve");
        handle.submit("hello").await.expect("send");
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn optimistic_precondition_failures_leave_transcript_untouched() {
        let connector = Arc::new(MockConnector::auto_open());
        let identity = IdentityCell::new();
        let handle = spawn(
            SyncOptions::default().with_echo(EchoPolicy::Optimistic),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            Arc::new(ScriptedSnapshot::default()),
            identity.clone(),
        );
        status_where(&handle, |s| s.snapshot_loaded && s.channel == Some(ChannelState::Open))
            .await;
        let channel = connector.latest().expect("channel");
        let before = handle.transcript().borrow().clone();

        assert_eq!(handle.submit("hello").await, Err(SubmitError::Unauthenticated));
        identity.resolve(alice()).expect("resolve");
        assert_eq!(handle.submit(" \t ").await, Err(SubmitError::EmptyInput));

        let after = handle.transcript().borrow().clone();
        assert_eq!(after.revision, before.revision);
        assert_eq!(after.len(), before.len());
        assert!(channel.sent().is_empty());

        handle.submit("hello").await.expect("send");
        let echoed = transcript_where(&handle, |t| t.len() == before.len() + 1).await;
        assert!(echoed.revision > before.revision);
    }

    #[tokio::test]
    async fn optimistic_echo_is_confirmed_in_place() {
        let connector = Arc::new(MockConnector::auto_open());
        let handle = spawn(
            SyncOptions::default().with_echo(EchoPolicy::Optimistic),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            Arc::new(ScriptedSnapshot::default()),
            IdentityCell::signed_in(alice()),
        );
        status_where(&handle, |s| s.snapshot_loaded && s.channel == Some(ChannelState::Open))
            .await;

        handle.submit("hi").await.expect("send");
        let pending = transcript_where(&handle, |t| t.len() == 1).await;
        assert!(pending.entries[0].pending);

        // The relay echoes the frame back verbatim.
        let channel = connector.latest().expect("channel");
        let echoed = channel.sent().remove(0);
        channel.deliver(echoed);

        let confirmed = transcript_where(&handle, |t| t.entries.iter().all(|e| !e.pending)).await;
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed.entries[0].message.body, "hi");
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let connector = Arc::new(MockConnector::auto_open());
        let handle = spawn(
            SyncOptions::default(),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            Arc::new(ScriptedSnapshot::default()),
            IdentityCell::new(),
        );
        status_where(&handle, |s| s.snapshot_loaded && s.channel == Some(ChannelState::Open))
            .await;

        let channel = connector.latest().expect("channel");
        channel.deliver("{not json");
        channel.deliver(r#"{"user":{"id":"u2","username":"bob"},"message":"ok"}"#);

        let transcript = transcript_where(&handle, |t| t.len() == 1).await;
        assert_eq!(transcript.entries[0].message.body, "ok");
        assert!(handle.status().borrow().last_error.is_some());
    }

    #[tokio::test]
    async fn reconnect_resyncs_and_ignores_old_instance() {
        let connector = Arc::new(MockConnector::auto_open());
        let loader = Arc::new(ScriptedSnapshot::default());
        let reconnect = ReconnectPolicy::disabled()
            .with_attempts(3)
            .with_backoff(Duration::from_millis(10));
        let handle = spawn(
            SyncOptions::default().with_reconnect(reconnect),
            connector.clone(),
            PushEndpoint::new("127.0.0.1:8080"),
            loader.clone(),
            IdentityCell::new(),
        );
        status_where(&handle, |s| s.snapshot_loaded && s.channel == Some(ChannelState::Open))
            .await;
        let first = connector.latest().expect("first channel");
        assert_eq!(loader.calls(), 1);

        loader.set_fallback(vec![msg("u2", "bob", "missed while offline")]);
        first.drop_connection();

        eventually(|| connector.opened().len() == 2).await;
        let status = status_where(&handle, |s| s.reconnect_attempts == 1).await;
        assert_eq!(status.reconnect_attempts, 1);
        transcript_where(&handle, |t| t.len() == 1).await;
        assert_eq!(loader.calls(), 2);

        first.deliver(r#"{"user":{"id":"u3"},"message":"ghost"}"#);
        let second = connector.latest().expect("second channel");
        second.deliver(r#"{"user":{"id":"u2","username":"bob"},"message":"live"}"#);

        let transcript = transcript_where(&handle, |t| t.len() == 2).await;
        let bodies: Vec<&str> = transcript.messages().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["missed while offline", "live"]);
    }
}
