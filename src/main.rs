// =============================================================================
// fleet-trader — main entry point
// =============================================================================
//
// Loads every enabled trader from the store, starts one `TraderWorker` per
// trader, and runs until SIGINT/SIGTERM, then stops all workers and persists
// their final `is_running` state before exiting.
// =============================================================================

mod config;
mod exchange;
mod feature_engine;
mod indicators;
mod llm;
mod market_data;
mod performance;
mod pipeline;
mod store;
mod supervisor;
mod symbol_filter;
mod types;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::supervisor::TraderSupervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("fleet-trader starting up");

    let pool = match store::connect().await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect to the store, exiting");
            return Err(e.into());
        }
    };

    if let Err(e) = store::run_migrations(&pool).await {
        error!(error = %e, "failed to run store migrations, exiting");
        return Err(e.into());
    }

    let repo = store::StoreRepository::new(pool);
    let supervisor = TraderSupervisor::new(repo);

    supervisor.load_all().await;
    supervisor.start_all().await;

    info!("all enabled traders started, press Ctrl+C to stop");

    wait_for_shutdown_signal().await;
    warn!("shutdown signal received, stopping all traders");

    supervisor.stop_all().await;

    info!("fleet-trader shut down complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
