mod api;
mod constants;

use anyhow::Context;
use clap::Parser;
use ledger_core::{
    constants::{DEFAULT_POLL_TIMEOUT_MS, DEFAULT_TAIL_SIZE, MAX_TAIL_SIZE},
    ChainStore, LedgerError, PollGateway,
};
use ledger_storage::SledStore;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN};

#[derive(Parser, Debug)]
#[command(name = "ledger-node", about = "Serve the plastic classification ledger over HTTP")]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "LEDGER_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,

    /// Data directory for sled
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Keep the chain in memory only; nothing survives a restart
    #[arg(long, env = "LEDGER_IN_MEMORY")]
    in_memory: bool,

    /// Window size served when a poller does not pass `n`
    #[arg(long, env = "LEDGER_TAIL_SIZE", default_value_t = DEFAULT_TAIL_SIZE)]
    tail_size: usize,

    /// Largest window a single poll may return
    #[arg(long, env = "LEDGER_MAX_TAIL", default_value_t = MAX_TAIL_SIZE)]
    max_tail: usize,

    /// Upper bound for serving one poll, in milliseconds
    #[arg(long, env = "LEDGER_POLL_TIMEOUT_MS", default_value_t = DEFAULT_POLL_TIMEOUT_MS)]
    poll_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ledger_node=debug,tower_http=debug")),
        )
        .init();

    let args = Args::parse();
    let store = Arc::new(open_store(&args)?);
    match store.ensure_genesis() {
        Ok(()) => {}
        // Keep serving so the operator can inspect the chain.
        Err(LedgerError::ChainCorrupted { at }) => {
            error!(at, "chain failed verification, serving read-only diagnostics")
        }
        Err(e) => return Err(e).context("initializing chain"),
    }
    if let Some((height, hash)) = store.tip() {
        info!(height, hash = %hex::encode(hash), "chain ready");
    }

    let tail_size = args.tail_size.min(args.max_tail);
    if tail_size != args.tail_size {
        warn!(requested = args.tail_size, used = tail_size, "tail size capped");
    }

    let shutdown = CancellationToken::new();
    let gateway = PollGateway::new(store.clone())
        .with_max_window(args.max_tail)
        .with_timeout(Duration::from_millis(args.poll_timeout_ms));
    let state = AppState {
        store: store.clone(),
        gateway,
        tail_size,
        shutdown: shutdown.clone(),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("ledger-node listening on http://{}", args.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    store.close()?;
    info!("ledger-node stopped");
    Ok(())
}

fn open_store(args: &Args) -> anyhow::Result<ChainStore> {
    if args.in_memory {
        info!("running with an in-memory chain");
        return Ok(ChainStore::new());
    }
    let sled = SledStore::open(&args.data_dir)?;
    let store = ChainStore::open(Arc::new(sled))
        .with_context(|| format!("restoring chain from {}", args.data_dir.display()))?;
    Ok(store)
}

/// Waits for Ctrl-C, then cancels in-flight polls.
async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_defaults() {
        let args = Args::try_parse_from(["ledger-node"]).unwrap();
        assert_eq!(args.listen, DEFAULT_LISTEN.parse::<SocketAddr>().unwrap());
        assert_eq!(args.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert!(!args.in_memory);
        assert_eq!(args.tail_size, 10);
        assert_eq!(args.poll_timeout_ms, DEFAULT_POLL_TIMEOUT_MS);
    }

    #[test]
    fn args_overrides() {
        let args = Args::try_parse_from([
            "ledger-node",
            "--listen",
            "0.0.0.0:9000",
            "--in-memory",
            "--tail-size",
            "25",
        ])
        .unwrap();
        assert_eq!(args.listen.port(), 9000);
        assert!(args.in_memory);
        assert_eq!(args.tail_size, 25);
        assert!(open_store(&args).unwrap().snapshot().is_empty());
    }
}
