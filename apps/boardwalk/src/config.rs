use boardwalk_core::AuthorshipPolicy;
use clap::ValueEnum;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::channel::{PushEndpoint, ReconnectPolicy};
use crate::compose::EchoPolicy;
use crate::snapshot::HttpSnapshotLoader;
use crate::sync::SyncOptions;
use crate::transcript::SyncStrategy;

pub const DEFAULT_SERVER: &str = "127.0.0.1:8080";

/// Command-line spelling of [`AuthorshipPolicy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Authorship {
    #[default]
    DisplayName,
    StableId,
}

impl From<Authorship> for AuthorshipPolicy {
    fn from(value: Authorship) -> Self {
        match value {
            Authorship::DisplayName => AuthorshipPolicy::DisplayName,
            Authorship::StableId => AuthorshipPolicy::StableId,
        }
    }
}

/// Boardwalk client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay address; serves both the push and the snapshot endpoint.
    pub server: String,
    pub sync: SyncOptions,
}

impl ClientConfig {
    /// Load configuration from `BOARDWALK_*` environment variables. Values
    /// that fail to parse fall back to their defaults.
    pub fn from_env() -> Self {
        let server = env::var("BOARDWALK_SERVER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        let strategy: SyncStrategy = enum_var("BOARDWALK_STRATEGY").unwrap_or_default();
        let echo: EchoPolicy = enum_var("BOARDWALK_ECHO").unwrap_or_default();
        let authorship: Authorship = enum_var("BOARDWALK_AUTHORSHIP").unwrap_or_default();

        let mut reconnect = ReconnectPolicy::default();
        if let Some(attempts) = number_var::<u32>("BOARDWALK_MAX_RECONNECTS") {
            reconnect = reconnect.with_attempts(attempts);
        }
        if let Some(ms) = number_var::<u64>("BOARDWALK_RECONNECT_BACKOFF_MS") {
            reconnect = reconnect.with_backoff(Duration::from_millis(ms));
        }

        Self {
            server,
            sync: SyncOptions::default()
                .with_strategy(strategy)
                .with_echo(echo)
                .with_authorship(authorship.into())
                .with_reconnect(reconnect),
        }
    }

    pub fn push_endpoint(&self) -> PushEndpoint {
        PushEndpoint::new(&self.server)
    }

    pub fn snapshot_loader(&self) -> HttpSnapshotLoader {
        HttpSnapshotLoader::new(&self.server)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            sync: SyncOptions::default(),
        }
    }
}

fn enum_var<T: ValueEnum>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match T::from_str(raw.trim(), true) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target: "boardwalk::config", key, value = %raw, error = %err, "ignoring invalid setting");
            None
        }
    }
}

/// Out-of-range values are rejected like any other parse failure.
fn number_var<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target: "boardwalk::config", key, value = %raw, error = %err, "ignoring invalid setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests must not run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const KEYS: [&str; 6] = [
        "BOARDWALK_SERVER",
        "BOARDWALK_STRATEGY",
        "BOARDWALK_ECHO",
        "BOARDWALK_AUTHORSHIP",
        "BOARDWALK_MAX_RECONNECTS",
        "BOARDWALK_RECONNECT_BACKOFF_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "127.0.0.1:8080");
        assert_eq!(config.sync.strategy, SyncStrategy::DirectAppend);
        assert_eq!(config.sync.echo, EchoPolicy::ServerEcho);
        assert_eq!(config.sync.authorship, AuthorshipPolicy::DisplayName);
        assert!(!config.sync.reconnect.enabled());
        assert_eq!(
            config.push_endpoint().build_url(),
            "ws://127.0.0.1:8080/ws"
        );
    }

    #[test]
    fn from_env_without_variables_matches_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(ClientConfig::from_env(), ClientConfig::default());
    }

    #[test]
    fn from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("BOARDWALK_SERVER", "https://chat.example.com");
            env::set_var("BOARDWALK_STRATEGY", "refetch-on-notify");
            env::set_var("BOARDWALK_ECHO", "optimistic");
            env::set_var("BOARDWALK_AUTHORSHIP", "stable-id");
            env::set_var("BOARDWALK_MAX_RECONNECTS", "5");
            env::set_var("BOARDWALK_RECONNECT_BACKOFF_MS", "250");
        }

        let config = ClientConfig::from_env();
        assert_eq!(config.sync.strategy, SyncStrategy::RefetchOnNotify);
        assert_eq!(config.sync.echo, EchoPolicy::Optimistic);
        assert_eq!(config.sync.authorship, AuthorshipPolicy::StableId);
        assert_eq!(config.sync.reconnect.max_attempts, 5);
        assert_eq!(config.sync.reconnect.backoff, Duration::from_millis(250));
        assert_eq!(
            config.push_endpoint().build_url(),
            "wss://chat.example.com/ws"
        );
        assert_eq!(
            config.snapshot_loader().snapshot_url(),
            "https://chat.example.com/api/messages"
        );

        clear_env();
    }

    #[test]
    fn invalid_values_fall_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("BOARDWALK_STRATEGY", "sometimes");
            env::set_var("BOARDWALK_MAX_RECONNECTS", "lots");
        }
        let config = ClientConfig::from_env();
        assert_eq!(config.sync.strategy, SyncStrategy::DirectAppend);
        assert!(!config.sync.reconnect.enabled());
        clear_env();
    }

    #[test]
    fn oversized_reconnect_count_is_rejected_not_truncated() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("BOARDWALK_MAX_RECONNECTS", "4294967296");
            env::set_var("BOARDWALK_RECONNECT_BACKOFF_MS", "-5");
        }
        let config = ClientConfig::from_env();
        assert_eq!(config.sync.reconnect, ReconnectPolicy::default());

        unsafe {
            env::set_var("BOARDWALK_MAX_RECONNECTS", "4294967295");
        }
        assert_eq!(ClientConfig::from_env().sync.reconnect.max_attempts, u32::MAX);
        clear_env();
    }
}
