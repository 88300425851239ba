//! Configuration types and loading

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Store configuration
///
/// All fields have defaults, so an empty config file (or none at all) is
/// fully usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the storage slots and lock file
    pub state_dir: PathBuf,

    /// Directory of cached non-identity files, cleared on safe reset
    pub cache_dir: Option<PathBuf>,

    /// Minimum seconds between secondary backup generations
    pub backup_interval_secs: u64,

    /// Secondary backups older than this are ignored on restore
    pub backup_stale_secs: u64,

    /// Rolling window for rate-limiting recovery escalation
    pub recovery_window_secs: u64,

    /// Recovery attempts inside the window beyond which a safe reset fires
    pub recovery_attempt_threshold: usize,

    /// Store command channel capacity
    pub channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            cache_dir: None,
            backup_interval_secs: 30 * 60,
            backup_stale_secs: 24 * 60 * 60,
            recovery_window_secs: 5 * 60,
            recovery_attempt_threshold: 3,
            channel_capacity: 64,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("framestore")
        .join("state")
}

impl StoreConfig {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .framestore.yml
        let local_config = PathBuf::from(".framestore.yml");
        if local_config.exists() {
            if let Ok(config) = Self::load_from_file(&local_config) {
                return Ok(config);
            }
        }

        // Try user config: ~/.config/framestore/framestore.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("framestore").join("framestore.yml");
            if user_config.exists() {
                if let Ok(config) = Self::load_from_file(&user_config) {
                    return Ok(config);
                }
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .context(format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Millisecond view of the recovery window
    pub fn recovery_window_ms(&self) -> i64 {
        self.recovery_window_secs as i64 * 1000
    }

    /// Millisecond view of the backup staleness cutoff
    pub fn backup_stale_ms(&self) -> i64 {
        self.backup_stale_secs as i64 * 1000
    }
}
