use url::Url;

use super::ChannelError;

const DEFAULT_PUSH_PATH: &str = "/ws";

/// Where the push channel connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEndpoint {
    /// Server address or full ws:// / wss:// URL
    pub server: String,
    /// Path appended to the server (defaults to "/ws")
    pub path: String,
    /// Whether to use TLS when the address carries no scheme
    pub use_tls: bool,
}

impl PushEndpoint {
    pub fn new(server: impl Into<String>) -> Self {
        let server = server.into();
        // Auto-detect TLS based on the address
        let use_tls = server.starts_with("wss://")
            || (!server.starts_with("ws://")
                && !server.contains("127.0.0.1")
                && !server.contains("localhost"));

        Self {
            server,
            path: DEFAULT_PUSH_PATH.to_string(),
            use_tls,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Build the full push URL.
    pub fn build_url(&self) -> String {
        let mut url = self.server.trim_end_matches('/').to_string();

        if let Some(rest) = url.strip_prefix("http://") {
            url = format!("ws://{rest}");
        } else if let Some(rest) = url.strip_prefix("https://") {
            url = format!("wss://{rest}");
        } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
            url = if self.use_tls {
                format!("wss://{url}")
            } else {
                format!("ws://{url}")
            };
        }

        // Normalize localhost to avoid IPv6 issues
        if url.contains("localhost") {
            url = url.replace("localhost", "127.0.0.1");
        }

        if !self.path.is_empty() {
            if !self.path.starts_with('/') {
                url.push('/');
            }
            url.push_str(&self.path);
        }

        url
    }

    /// Build and validate the push URL.
    pub fn url(&self) -> Result<Url, ChannelError> {
        let raw = self.build_url();
        let parsed = Url::parse(&raw).map_err(|_| ChannelError::InvalidEndpoint(raw.clone()))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(parsed),
            _ => Err(ChannelError::InvalidEndpoint(raw)),
        }
    }
}
