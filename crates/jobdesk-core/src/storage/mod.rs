pub mod cache;
mod config;
pub mod database;
pub mod tombstones;

pub use cache::LocalCache;
pub use config::{CalendarConfig, Config, RemoteConfig, RetryConfig, StorageConfig};
pub use database::{Database, SharedDb};
pub use tombstones::TombstoneSet;

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::{ConfigError, StorageError};

/// Returns `~/.config/jobdesk[-dev]/` based on JOBDESK_ENV.
///
/// Set JOBDESK_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .ok_or(ConfigError::NoDataDir)?
        .join(".config");

    let env = std::env::var("JOBDESK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("jobdesk-dev")
    } else {
        base_dir.join("jobdesk")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex.lock().map_err(|_| StorageError::Poisoned)
}
