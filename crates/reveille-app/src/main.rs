//! Reveille daemon - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Open the SQLite schedule
//! 3. Build the engine and start the trigger scheduler
//! 4. Serve the REST API until ctrl-c, then stop every live session

mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use reveille_api::{start_server, AppState};
use reveille_core::clock::SystemClock;
use reveille_core::config::ReveilleConfig;
use reveille_engine::{Engine, LoggingEntityBackend, LoggingNotifier, SimulatedPlayer};
use reveille_storage::{Database, SqliteItemStore};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::CliArgs::parse();
    let config_file = cli.resolve_config_path();
    let mut config = ReveilleConfig::load_or_default(&config_file);
    config.general.port = cli.resolve_port(config.general.port);

    // Tracing. RUST_LOG overrides the configured level.
    let level = cli.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    tracing::info!("Starting Reveille v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = cli.resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("reveille.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Device adapters live outside this binary; the simulated player and
    // the logging entity and notification backends stand in for them.
    let engine = Arc::new(Engine::new(
        config,
        Arc::new(SqliteItemStore::new(db)),
        Arc::new(SimulatedPlayer::new()),
        Arc::new(LoggingEntityBackend),
        Arc::new(LoggingNotifier),
        Arc::new(SystemClock),
    )?);
    let scheduler = engine.spawn_scheduler();

    // === API server ===

    let served = start_server(AppState::new(Arc::clone(&engine)), shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "API server stopped");
    }

    engine.shutdown().await;
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }
    tracing::info!("Reveille stopped");

    served.map_err(Into::into)
}
