mod config;
pub mod database;
pub mod migrations;
mod store;

pub use config::{AlarmConfig, Config, Profile, PuzzleConfig, SessionConfig};
pub use database::Database;
pub use store::{AlarmStore, StoreResult};

use std::path::PathBuf;

/// True when `MATHALARM_ENV=dev`.
pub fn is_dev_env() -> bool {
    std::env::var("MATHALARM_ENV")
        .map(|v| v == "dev")
        .unwrap_or(false)
}

/// Returns `~/.config/mathalarm[-dev]/` based on MATHALARM_ENV.
///
/// Set MATHALARM_ENV=dev to use development data directory.
/// MATHALARM_HOME replaces the whole path.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    if let Some(home) = std::env::var_os("MATHALARM_HOME") {
        let dir = PathBuf::from(home);
        std::fs::create_dir_all(&dir)?;
        return Ok(dir);
    }

    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let dir = if is_dev_env() {
        base_dir.join("mathalarm-dev")
    } else {
        base_dir.join("mathalarm")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
