use async_trait::async_trait;
use boardwalk_core::{Message, PayloadError};
use thiserror::Error;

pub mod http;
pub mod mock;

pub use http::HttpSnapshotLoader;
pub use mock::ScriptedSnapshot;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("snapshot request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("snapshot endpoint returned {0}")]
    Status(reqwest::StatusCode),
    #[error("snapshot body malformed: {0}")]
    Malformed(#[from] PayloadError),
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
}

/// One-shot fetch of the full transcript from the backing store. Must be safe
/// to call any number of times.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Vec<Message>, FetchError>;
}
