pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use std::path::Path;

use crate::commands::AppState;
use crate::config::PlannerConfig;
use crate::error::AppResult;

/// Loads configuration, starts logging under `data_dir/logs` and opens the
/// planner database at `data_dir/dayshape.sqlite`.
pub fn bootstrap(data_dir: &Path, config_path: Option<&Path>) -> AppResult<AppState> {
    crate::utils::logger::init_logging(&data_dir.join("logs"))?;
    let config = PlannerConfig::load(config_path)?;
    tracing::info!(
        target: "app::bootstrap",
        solver = %config.solver_base_url,
        calendar_sync = config.calendar_sync_enabled,
        "planner starting"
    );
    AppState::open(&data_dir.join("dayshape.sqlite"), config)
}
