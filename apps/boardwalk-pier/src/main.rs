use anyhow::{Context, Result};
use boardwalk_pier::{serve, NotifyMode, PierState};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
struct PierConfig {
    listen_addr: SocketAddr,
    notify: NotifyMode,
}

#[derive(Debug, Parser)]
#[command(
    name = "boardwalk-pier",
    author,
    version,
    about = "Boardwalk chat relay: snapshot endpoint and WebSocket fan-out"
)]
struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "BOARDWALK_PIER_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: String,

    /// Broadcast full records or bare change notices.
    #[arg(long, env = "BOARDWALK_PIER_NOTIFY", value_enum, default_value_t = NotifyMode::Full)]
    notify: NotifyMode,
}

impl TryFrom<Cli> for PierConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        Ok(PierConfig {
            listen_addr,
            notify: cli.notify,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    let config = PierConfig::try_from(Cli::parse())?;
    info!(
        listen_addr = %config.listen_addr,
        notify = ?config.notify,
        "starting boardwalk pier"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    let state = Arc::new(PierState::new(config.notify));

    serve(listener, state.clone(), shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(stored = state.log.len(), "graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
