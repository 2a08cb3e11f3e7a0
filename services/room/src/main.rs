use anyhow::{Context, Result};
use clap::Parser;
use stakeroom_room::{JsonFileStore, Ledger, RoomConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// JSON file holding user balances.
    #[arg(long, default_value = "db.json")]
    ledger: PathBuf,

    /// Shared secret for POST /charge. Admin charges are refused when unset.
    #[arg(long, env = "ROOM_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config() -> Result<RoomConfig> {
    RoomConfig::from_env()
        .validate()
        .context("invalid room configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = build_config()?;
    let ledger = Ledger::open(JsonFileStore::new(&args.ledger))
        .with_context(|| format!("failed to open ledger at {}", args.ledger.display()))?;
    if args.admin_token.is_none() {
        warn!("no admin token configured; /charge will reject every request");
    }

    let service = stakeroom_room::start(config, Arc::new(ledger), args.admin_token);

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "room listening");
    axum::serve(listener, service.router)
        .await
        .context("server error")?;
    Ok(())
}
