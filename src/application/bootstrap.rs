use crate::application::rebalance::RetryPolicy;
use crate::application::session::SessionSettings;
use crate::infrastructure::config::{
    ensure_default_configs, load_configs, read_capacity_defaults, read_solver_settings,
    SolverSettings,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOG_FILE_NAME: &str = "studyplan.log";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

pub fn logs_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("logs")
}

/// Opens the workspace log file for appending, creating `logs/` if needed.
pub fn open_log_file(workspace_root: &Path) -> Result<File, InfraError> {
    let logs_dir = logs_dir(workspace_root);
    fs::create_dir_all(&logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE_NAME))?;
    Ok(file)
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = logs_dir(workspace_root);
    let database_path = state_dir.join("studyplan.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}

/// Reads the planner and solver config files into session settings.
pub fn load_session_settings(
    config_dir: &Path,
) -> Result<(SessionSettings, SolverSettings), InfraError> {
    let solver = read_solver_settings(config_dir)?;
    let settings = SessionSettings {
        capacity: read_capacity_defaults(config_dir)?,
        retry_policy: RetryPolicy::from(&solver),
    };
    Ok((settings, solver))
}
