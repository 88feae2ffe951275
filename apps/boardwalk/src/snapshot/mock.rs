use async_trait::async_trait;
use boardwalk_core::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{FetchError, SnapshotSource};

/// Snapshot source that replays scripted results in order. Once the script
/// runs dry every call returns the fallback transcript.
#[derive(Default)]
pub struct ScriptedSnapshot {
    script: Mutex<VecDeque<Result<Vec<Message>, FetchError>>>,
    fallback: Mutex<Vec<Message>>,
    calls: AtomicUsize,
}

impl ScriptedSnapshot {
    pub fn new(fallback: Vec<Message>) -> Self {
        Self {
            fallback: Mutex::new(fallback),
            ..Self::default()
        }
    }

    pub fn push_ok(&self, messages: Vec<Message>) {
        self.script.lock().push_back(Ok(messages));
    }

    pub fn push_err(&self, err: FetchError) {
        self.script.lock().push_back(Err(err));
    }

    pub fn set_fallback(&self, messages: Vec<Message>) {
        *self.fallback.lock() = messages;
    }

    /// Number of `fetch_snapshot` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshot {
    async fn fetch_snapshot(&self) -> Result<Vec<Message>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.fallback.lock().clone()),
        }
    }
}
