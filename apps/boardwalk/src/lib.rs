pub mod channel;
pub mod compose;
pub mod config;
pub mod identity;
pub mod logging;
pub mod render;
pub mod snapshot;
pub mod sync;
pub mod transcript;

pub use channel::{ChannelState, Connector, PushChannel, PushEndpoint, ReconnectPolicy};
pub use compose::{EchoPolicy, SubmitError};
pub use config::ClientConfig;
pub use identity::IdentityCell;
pub use snapshot::{FetchError, SnapshotSource};
pub use sync::{SyncHandle, SyncOptions, SyncStatus};
pub use transcript::{SyncStrategy, TranscriptSnapshot};
