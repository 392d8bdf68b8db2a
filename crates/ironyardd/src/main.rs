//! ironyardd — the ironyard scheduler daemon.
//!
//! # Usage
//!
//! ```text
//! ironyardd serve --config /etc/ironyard/scheduler.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ironyard_core::SchedulerConfig;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "ironyardd", about = "ironyard scheduler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler service.
    Serve {
        /// Path to the scheduler TOML config.
        #[arg(long, default_value = "/etc/ironyard/scheduler.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ironyard=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    info!(config = ?config_path, "ironyard scheduler starting");

    let config = SchedulerConfig::from_file(&config_path)?;
    let addr: SocketAddr = config
        .rpc
        .listen
        .parse()
        .with_context(|| format!("bad rpc.listen address: {}", config.rpc.listen))?;

    // ── Initialize subsystems ──────────────────────────────────

    let services = ironyardd::build(&config)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let updater = services.updater.clone();
    let updater_handle = tokio::spawn(async move {
        updater.run(shutdown_rx).await;
    });

    // ── Start RPC server ───────────────────────────────────────

    let router = ironyardd::build_router(services.manager);
    info!(%addr, "RPC server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = updater_handle.await;

    info!("ironyard scheduler stopped");
    Ok(())
}
