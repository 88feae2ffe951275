//! Log output for the terminal client.
//!
//! The transcript owns stdout, so events go to stderr or a file. Every event
//! the client emits is tagged with one of [`TARGETS`]; the default filter
//! opens exactly those at the chosen level and keeps everything else
//! (tokio, hyper, reqwest, tungstenite) at warn.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Overrides the derived filter with a full `EnvFilter` directive string.
pub const FILTER_VAR: &str = "BOARDWALK_LOG_FILTER";

/// Targets used by the client's `tracing` events.
pub const TARGETS: &[&str] = &[
    "boardwalk::channel",
    "boardwalk::snapshot",
    "boardwalk::transcript",
    "boardwalk::compose",
    "boardwalk::identity",
    "boardwalk::sync",
    "boardwalk::config",
    "boardwalk::cli",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid BOARDWALK_LOG_FILTER: {0}")]
    Filter(String),
    #[error("a global subscriber is already installed: {0}")]
    Install(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Calling it again after a successful
/// install does nothing.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let filter = filter_for(config.level, std::env::var(FILTER_VAR).ok())?;
    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(())
}

/// An explicit directive string wins; otherwise [`client_directives`].
fn filter_for(level: LogLevel, explicit: Option<String>) -> Result<EnvFilter, InitError> {
    let directives = match explicit.filter(|value| !value.trim().is_empty()) {
        Some(value) => value,
        None => client_directives(level),
    };
    EnvFilter::try_new(&directives).map_err(|err| InitError::Filter(format!("{directives:?}: {err}")))
}

/// `warn` for dependencies, `level` for each client target.
pub fn client_directives(level: LogLevel) -> String {
    let level = LevelFilter::from(level);
    let floor = LevelFilter::WARN.min(level);
    TARGETS.iter().fold(floor.to_string(), |mut directives, target| {
        directives.push_str(&format!(",{target}={level}"));
        directives
    })
}
