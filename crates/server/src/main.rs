// crates/server/src/main.rs
//! Jobwatch server binary.
//!
//! Reads `JOBWATCH_*` configuration, applies command-line overrides, opens the
//! job store and serves the API until ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jobwatch_core::{JobStore, MemoryJobStore};
use jobwatch_db::Database;
use jobwatch_server::{create_app, init_metrics, AppState, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "warn,jobwatch_server=info,jobwatch_core=info,jobwatch_db=info";

#[derive(Debug, Parser)]
#[command(name = "jobwatch", version, about = "Job lifecycle tracking with live status streams")]
struct Cli {
    /// Port to listen on (overrides JOBWATCH_PORT / PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides JOBWATCH_HOST)
    #[arg(long)]
    host: Option<String>,

    /// SQLite database file (overrides JOBWATCH_DB)
    #[arg(long, conflicts_with = "in_memory")]
    db: Option<PathBuf>,

    /// Keep jobs in memory only; nothing survives a restart
    #[arg(long)]
    in_memory: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn open_store(cli: &Cli, config: &ServerConfig) -> Result<Arc<dyn JobStore>> {
    if cli.in_memory {
        tracing::warn!("Using in-memory job store; jobs are lost on exit");
        return Ok(Arc::new(MemoryJobStore::new()));
    }
    let db = match &config.db_path {
        Some(path) => Database::new(path)
            .await
            .with_context(|| format!("opening database at {}", path.display()))?,
        None => Database::open_default()
            .await
            .context("opening default database")?,
    };
    Ok(Arc::new(db))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(db) = &cli.db {
        config.db_path = Some(db.clone());
    }

    init_tracing(config.log_json);
    init_metrics();

    if config.auth.is_empty() {
        tracing::warn!("JOBWATCH_TOKENS is empty; job submission and cancellation will answer 401");
    }

    let store = open_store(&cli, &config).await?;
    let state = AppState::new(
        store,
        config.manager.clone(),
        config.stream.clone(),
        config.auth.clone(),
    );
    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(
        %addr,
        tokens = config.auth.len(),
        poll_ms = config.stream.poll_interval.as_millis() as u64,
        max_polls = config.stream.max_polls,
        "jobwatch v{} listening",
        env!("CARGO_PKG_VERSION")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
