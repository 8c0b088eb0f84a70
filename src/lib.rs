pub mod analysis; // Baselines, correlation, patterns, insight tiers, cohorts
pub mod config;
pub mod core_state;
pub mod db;
pub mod jobs; // Worker pool, stale-job sweep, prompt scheduler
pub mod models;

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::core_state::{CoreError, CoreState};

/// Overrides the data directory (`~/Careloom` by default).
pub const DATA_DIR_ENV: &str = "CARELOOM_DATA_DIR";

fn data_dir() -> Result<PathBuf, CoreError> {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(config::app_data_dir()?),
    }
}

/// Run the engine until ctrl-c.
pub fn run() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let dir = data_dir()?;
    let state = Arc::new(CoreState::from_data_dir(&dir)?);
    // Runs migrations before any worker touches the file.
    drop(state.open_db()?);
    tracing::info!(db = %state.db_path.display(), "Database ready");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let engine = jobs::start_engine(state);
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for shutdown signal");
        }
        tracing::info!("Shutdown requested");
        engine.shutdown().await;
    });
    Ok(())
}
