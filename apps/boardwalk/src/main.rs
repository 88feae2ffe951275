use anyhow::Result;
use boardwalk_client_core::channel::{ChannelState, WebSocketConnector};
use boardwalk_client_core::compose::{EchoPolicy, SubmitError};
use boardwalk_client_core::config::{Authorship, ClientConfig};
use boardwalk_client_core::identity::IdentityCell;
use boardwalk_client_core::render::{TranscriptPrinter, render};
use boardwalk_client_core::sync::{self, SyncStatus};
use boardwalk_client_core::logging::{self, LogConfig, LogLevel};
use boardwalk_client_core::transcript::{SyncStrategy, TranscriptSnapshot};
use boardwalk_core::{AuthorshipPolicy, SessionIdentity};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

/// Connection and sync settings start from `ClientConfig::from_env`
/// (`BOARDWALK_SERVER`, `BOARDWALK_STRATEGY`, ...); flags given here win.
#[derive(Parser, Debug)]
#[command(name = "boardwalk", about = "Terminal client for a boardwalk chat relay")]
struct Cli {
    /// Relay address (host:port or URL); serves /ws and /api/messages
    #[arg(long)]
    server: Option<String>,

    #[arg(long, value_enum)]
    strategy: Option<SyncStrategy>,

    #[arg(long, value_enum)]
    echo: Option<EchoPolicy>,

    #[arg(long, value_enum)]
    authorship: Option<Authorship>,

    /// Reconnect attempts after the push channel drops (0 disables)
    #[arg(long)]
    max_reconnects: Option<u32>,

    #[arg(long)]
    reconnect_backoff_ms: Option<u64>,

    /// Stable id of the signed-in user; omit to start as an observer
    #[arg(long, env = "BOARDWALK_USER_ID")]
    user_id: Option<String>,

    #[arg(long, env = "BOARDWALK_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "BOARDWALK_FULL_NAME")]
    full_name: Option<String>,

    #[arg(long, env = "BOARDWALK_IMAGE_URL")]
    image_url: Option<String>,

    #[arg(long, env = "BOARDWALK_LOG_LEVEL", value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr
    #[arg(long, env = "BOARDWALK_LOG_FILE")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        self.apply(ClientConfig::from_env())
    }

    fn apply(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        let mut sync = config.sync;
        if let Some(strategy) = self.strategy {
            sync = sync.with_strategy(strategy);
        }
        if let Some(echo) = self.echo {
            sync = sync.with_echo(echo);
        }
        if let Some(authorship) = self.authorship {
            sync = sync.with_authorship(authorship.into());
        }
        let mut reconnect = sync.reconnect;
        if let Some(attempts) = self.max_reconnects {
            reconnect = reconnect.with_attempts(attempts);
        }
        if let Some(ms) = self.reconnect_backoff_ms {
            reconnect = reconnect.with_backoff(Duration::from_millis(ms));
        }
        config.sync = sync.with_reconnect(reconnect);
        config
    }

    fn identity(&self) -> Option<SessionIdentity> {
        let id = self.user_id.as_ref()?;
        let mut identity = SessionIdentity::new(id);
        identity.username = self.username.clone();
        identity.full_name = self.full_name.clone();
        identity.image_url = self.image_url.clone();
        Some(identity)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Login(SessionIdentity),
    Refresh,
    Quit,
    Usage(&'static str),
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    let mut words = trimmed.split_whitespace();
    match words.next() {
        Some("/quit") => Input::Quit,
        Some("/refresh") => Input::Refresh,
        Some("/login") => {
            let (Some(id), Some(username)) = (words.next(), words.next()) else {
                return Input::Usage("usage: /login <id> <username> [full name]");
            };
            let full_name = words.collect::<Vec<_>>().join(" ");
            let mut identity = SessionIdentity::new(id).with_username(username);
            if !full_name.is_empty() {
                identity = identity.with_full_name(full_name);
            }
            Input::Login(identity)
        }
        _ => Input::Send(line.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let config = cli.config();
    let identity = match cli.identity() {
        Some(identity) => IdentityCell::signed_in(identity),
        None => IdentityCell::new(),
    };
    info!(target: "boardwalk::cli", server = %config.server, signed_in = identity.is_resolved(), "starting boardwalk");

    let handle = sync::spawn(
        config.sync,
        Arc::new(WebSocketConnector),
        config.push_endpoint(),
        Arc::new(config.snapshot_loader()),
        identity,
    );

    let printer = tokio::spawn(print_transcript(
        handle.transcript(),
        handle.identity().subscribe(),
        handle.authorship(),
    ));
    let reporter = tokio::spawn(report_status(handle.status()));

    if !handle.identity().is_resolved() {
        eprintln!("* observing; /login <id> <username> [full name] to send");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Refresh => {
                handle.refresh();
            }
            Input::Usage(usage) => eprintln!("! {usage}"),
            Input::Login(identity) => {
                let name = identity.display_name().to_string();
                match handle.identity().resolve(identity) {
                    Ok(()) => eprintln!("* signed in as {name}"),
                    Err(err) => eprintln!("! {err}"),
                }
            }
            Input::Send(text) => match handle.submit(text).await {
                Ok(_) => {}
                Err(SubmitError::Stopped) => break,
                Err(err) => eprintln!("! {err}"),
            },
        }
    }

    handle.shutdown().await;
    printer.abort();
    reporter.abort();
    Ok(())
}

async fn print_transcript(
    mut transcript: watch::Receiver<TranscriptSnapshot>,
    mut identity: watch::Receiver<Option<SessionIdentity>>,
    policy: AuthorshipPolicy,
) {
    let mut printer = TranscriptPrinter::new();
    loop {
        let lines = {
            let snapshot = transcript.borrow_and_update().clone();
            let session = identity.borrow_and_update().clone();
            render(&snapshot.entries, session.as_ref(), policy)
        };
        let written = {
            let mut out = std::io::stdout().lock();
            printer.update(lines, &mut out)
        };
        if let Err(err) = written {
            tracing::warn!(target: "boardwalk::cli", error = %err, "failed to write transcript");
            return;
        }

        tokio::select! {
            changed = transcript.changed() => if changed.is_err() { return },
            changed = identity.changed() => if changed.is_err() { return },
        }
    }
}

async fn report_status(mut status: watch::Receiver<SyncStatus>) {
    let mut shown: Option<ChannelState> = None;
    loop {
        let current = status.borrow_and_update().channel;
        if current != shown {
            match current {
                Some(ChannelState::Open) => eprintln!("* connected"),
                Some(ChannelState::Closed) => eprintln!("* disconnected"),
                _ => {}
            }
            shown = current;
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}
