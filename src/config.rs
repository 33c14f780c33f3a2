//! Configuration management
//!
//! The collector reads `pipelog.toml` from the data directory at startup and
//! rereads it on every reload signal. A missing or unparsable file yields the
//! built-in defaults at startup; a failed reload keeps the previous values,
//! because stale configuration is better than losing the log stream.

use crate::constants::CONFIG_FILE_NAME;
use crate::error::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Collector configuration
///
/// `redirect_stderr` is read once at supervisor startup; the remaining keys
/// take effect on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Whether stderr of the supervised tree is captured at all
    pub redirect_stderr: bool,

    /// Minutes between time-based rotations; 0 disables
    pub rotation_age_minutes: u64,

    /// File size in KiB that triggers a rotation; 0 disables
    pub rotation_size_kib: u64,

    /// Output directory, absolute or relative to the data directory
    pub log_directory: PathBuf,

    /// Literal prefix of every generated file name
    pub log_filename_prefix: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            redirect_stderr: false,
            rotation_age_minutes: 24 * 60,
            rotation_size_kib: 10 * 1024,
            log_directory: PathBuf::from("log"),
            log_filename_prefix: "pipelog-".to_string(),
        }
    }
}

/// Path of the configuration file inside a data directory
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

impl CollectorConfig {
    /// Read and parse the configuration file.
    ///
    /// Used by reload processing, which keeps the previous configuration
    /// when this fails.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CollectorError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| CollectorError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the configuration at startup, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}, using default configuration", e);
                Self::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
