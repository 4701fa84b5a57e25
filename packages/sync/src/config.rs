use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use atelier_common::CommonResult;

use crate::autosave::AutoSaveOptions;
use crate::realtime::RealtimeOptions;

pub const DEFAULT_CONFIG_NAME: &str = "atelier.config.json";

/// Atelier sync configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Auto-save tuning for the admin editors
    #[serde(default)]
    pub auto_save: AutoSaveConfig,

    /// Realtime batching tuning
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveConfig {
    #[serde(default = "default_autosave_debounce_ms")]
    pub debounce_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeConfig {
    #[serde(default = "default_update_debounce_ms")]
    pub update_debounce_ms: u64,

    #[serde(default = "default_max_pending_updates")]
    pub max_pending_updates: usize,

    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    #[serde(default = "default_start_editing_throttle_ms")]
    pub start_editing_throttle_ms: u64,

    #[serde(default = "default_stop_editing_throttle_ms")]
    pub stop_editing_throttle_ms: u64,
}

fn default_autosave_debounce_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_update_debounce_ms() -> u64 {
    500
}

fn default_max_pending_updates() -> usize {
    50
}

fn default_staleness_threshold_ms() -> u64 {
    30_000
}

fn default_start_editing_throttle_ms() -> u64 {
    1000
}

fn default_stop_editing_throttle_ms() -> u64 {
    500
}

impl SyncConfig {
    /// Load config from a directory
    pub fn load(cwd: &str) -> CommonResult<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: SyncConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(SyncConfig::default())
        }
    }
}

impl AutoSaveConfig {
    pub fn to_options(&self) -> AutoSaveOptions {
        AutoSaveOptions {
            debounce_delay: Duration::from_millis(self.debounce_delay_ms),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl RealtimeConfig {
    pub fn to_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            update_debounce: Duration::from_millis(self.update_debounce_ms),
            max_pending_updates: self.max_pending_updates,
            staleness_threshold: Duration::from_millis(self.staleness_threshold_ms),
            start_editing_throttle: Duration::from_millis(self.start_editing_throttle_ms),
            stop_editing_throttle: Duration::from_millis(self.stop_editing_throttle_ms),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_save: AutoSaveConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_delay_ms: default_autosave_debounce_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            update_debounce_ms: default_update_debounce_ms(),
            max_pending_updates: default_max_pending_updates(),
            staleness_threshold_ms: default_staleness_threshold_ms(),
            start_editing_throttle_ms: default_start_editing_throttle_ms(),
            stop_editing_throttle_ms: default_stop_editing_throttle_ms(),
        }
    }
}
