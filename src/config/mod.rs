//! Configuration
//!
//! Layered configuration for the pinset subsystem. Every runtime knob of the
//! bucket and coordinator lives here and is passed in explicitly.

mod loader;

pub use loader::ConfigLoader;

use crate::backoff::Backoff;
use crate::error::{PinsetError, Result};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage allowance per asset (bytes)
pub const DEFAULT_STORAGE_LIMIT: u64 = 500_000_000;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinsetConfig {
    /// Identity of the asset whose content this bucket pins
    #[serde(default = "default_asset_id")]
    pub asset_id: String,

    /// Controller of the pinset document
    #[serde(default = "default_controller_id")]
    pub controller_id: String,

    #[serde(default = "default_storage_limit")]
    pub storage_limit_bytes: u64,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub pinning: PinningConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_asset_id() -> String {
    "default".to_string()
}

fn default_controller_id() -> String {
    "local".to_string()
}

fn default_storage_limit() -> u64 {
    DEFAULT_STORAGE_LIMIT
}

impl Default for PinsetConfig {
    fn default() -> Self {
        Self {
            asset_id: default_asset_id(),
            controller_id: default_controller_id(),
            storage_limit_bytes: default_storage_limit(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            pinning: PinningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PinsetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.asset_id.trim().is_empty() {
            return Err(PinsetError::Config("asset_id cannot be empty".to_string()));
        }
        if self.controller_id.trim().is_empty() {
            return Err(PinsetError::Config(
                "controller_id cannot be empty".to_string(),
            ));
        }
        if self.pinning.initial_delay_ms == 0 {
            return Err(PinsetError::Config(
                "pinning.initial_delay_ms must be positive".to_string(),
            ));
        }
        if !(self.pinning.multiplier >= 1.0) {
            return Err(PinsetError::Config(format!(
                "pinning.multiplier must be at least 1.0, got {}",
                self.pinning.multiplier
            )));
        }
        if let Some(endpoint) = &self.pinning.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(PinsetError::Config(format!(
                    "Invalid pinning endpoint URL: {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Local storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the sled database; None means the XDG data dir
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the database directory
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let project_dirs = directories::ProjectDirs::from("", "pinset", "pinset").ok_or_else(
            || PinsetError::Config("Could not determine platform data directory".to_string()),
        )?;
        Ok(project_dirs.data_dir().join("store"))
    }
}

/// Mutation queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Minimum spacing between dequeued mutations (milliseconds)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Remote pinning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinningConfig {
    /// Pinning service base URL; None selects the local service
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token; falls back to PINSET_PINNING_TOKEN
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single poll delay; None means unbounded
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Give up on a pin after this long; None polls until cancelled
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// How long to wait for directory links before importing from the service
    #[serde(default = "default_link_resolve_timeout_ms")]
    pub link_resolve_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_link_resolve_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: None,
            deadline_ms: None,
            link_resolve_timeout_ms: default_link_resolve_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PinningConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max: self.max_delay_ms.map(Duration::from_millis),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn link_resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.link_resolve_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("PINSET_PINNING_TOKEN").ok())
    }
}

/// Global config file location (`$XDG_CONFIG_HOME/pinset/config.toml`)
pub fn global_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Some(Path::new(&xdg_config_home).join("pinset").join("config.toml"));
    }
    std::env::var("HOME").ok().map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("pinset")
            .join("config.toml")
    })
}
