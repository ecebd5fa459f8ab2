mod config;

pub use config::{Config, LoggingConfig, MediaConfig, TimingConfig};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/stagecall[-dev]/` based on STAGECALL_ENV.
///
/// Set STAGECALL_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("STAGECALL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("stagecall-dev")
    } else {
        base_dir.join("stagecall")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
