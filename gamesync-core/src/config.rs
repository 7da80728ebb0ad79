//! Engine configuration stored at `<data_dir>/engine-config.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::activity::RotationPolicy;

pub const CONFIG_FILE: &str = "engine-config.json";

/// Environment variable overriding [`EngineConfig::purge_secret`].
pub const PURGE_SECRET_ENV: &str = "GAMESYNC_PURGE_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the sequencing service.
    pub server_url: String,
    /// Interval between sync rounds when nothing is requested.
    pub sync_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub refresh_debounce_ms: u64,
    /// Poll attempts while waiting for in-flight sync work before erasure.
    pub drain_attempts: u32,
    pub drain_interval_ms: u64,
    pub activity_soft_limit_bytes: u64,
    pub activity_hard_limit_bytes: u64,
    /// Shared secret authenticating purge requests.
    pub purge_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8480".to_string(),
            sync_interval_ms: 5_000,
            request_timeout_secs: 30,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
            refresh_debounce_ms: 250,
            drain_attempts: 50,
            drain_interval_ms: 100,
            activity_soft_limit_bytes: 1024 * 1024,
            activity_hard_limit_bytes: 4 * 1024 * 1024,
            purge_secret: None,
        }
    }
}

impl EngineConfig {
    /// Load the config from a data directory; a missing file yields defaults.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let data = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read engine config from {:?}", config_path))?;
            serde_json::from_str(&data).with_context(|| "Failed to parse engine config JSON")?
        } else {
            Self::default()
        };
        if let Ok(secret) = std::env::var(PURGE_SECRET_ENV) {
            if !secret.is_empty() {
                config.purge_secret = Some(secret);
            }
        }
        Ok(config)
    }

    /// Save the config atomically.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        let config_path = data_dir.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            soft_limit: self.activity_soft_limit_bytes,
            hard_limit: self.activity_hard_limit_bytes,
        }
    }
}
