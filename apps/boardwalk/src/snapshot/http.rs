use async_trait::async_trait;
use boardwalk_core::{Message, parse_snapshot};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{FetchError, SnapshotSource};

const SNAPSHOT_PATH: &str = "/api/messages";

/// Fetches the transcript from the pier's snapshot endpoint.
pub struct HttpSnapshotLoader {
    client: Client,
    base_url: String,
}

impl HttpSnapshotLoader {
    pub fn new(server: &str) -> Self {
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference
        let server = if server.contains("localhost") {
            server.replace("localhost", "127.0.0.1")
        } else {
            server.to_string()
        };
        let server = server.trim_end_matches('/');

        let base_url = if let Some(rest) = server.strip_prefix("ws://") {
            format!("http://{rest}")
        } else if let Some(rest) = server.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };

        // Conservative timeouts and no proxy so an unreachable local pier
        // fails fast instead of hanging the refresh.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(4))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, base_url }
    }

    pub fn snapshot_url(&self) -> String {
        format!("{}{}", self.base_url, SNAPSHOT_PATH)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotLoader {
    async fn fetch_snapshot(&self) -> Result<Vec<Message>, FetchError> {
        let url = self.snapshot_url();
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.bytes().await?;
        let messages = parse_snapshot(&body)?;
        debug!(target: "boardwalk::snapshot", url = %url, count = messages.len(), "snapshot fetched");
        Ok(messages)
    }
}
