//! Bridge configuration, stored as JSON in the user config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Delay between a cell going idle and its host execution being ended.
    pub finalize_delay_ms: u64,
    /// Delay before re-subscribing after the kernel notification stream ends.
    pub resubscribe_backoff_ms: u64,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            finalize_delay_ms: 50,
            resubscribe_backoff_ms: 500,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn finalize_delay(&self) -> Duration {
        Duration::from_millis(self.finalize_delay_ms)
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_ms)
    }
}

/// Path of the config file (`<config_dir>/marimo-bridge/config.json`).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marimo-bridge")
        .join("config.json")
}

/// Load the config, falling back to defaults if the file is missing or invalid.
pub fn load_config(path: &Path) -> BridgeConfig {
    if !path.exists() {
        return BridgeConfig::default();
    }
    match try_load_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "[bridge] Ignoring config at {}: {}; using defaults",
                path.display(),
                e
            );
            BridgeConfig::default()
        }
    }
}

/// Load the config, failing if the file cannot be read or parsed.
pub fn try_load_config(path: &Path) -> Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write the config, creating the parent directory if needed.
pub fn save_config(path: &Path, config: &BridgeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
