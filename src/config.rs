//! Driver configuration
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! file (or no file) yields a working standalone configuration. CLI flags
//! override individual fields after loading.

use crate::cloud::{CloudPollConfig, HttpFilesystemApiConfig};
use crate::controlplane::provisioners::ScratchConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Cloud Settings
// =============================================================================

/// Backing service connection and polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudSettings {
    /// Service endpoint; absent selects the in-memory simulated service
    pub endpoint: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub creation_timeout_secs: u64,
    pub resize_timeout_secs: u64,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_secs: 30,
            poll_interval_secs: 30,
            creation_timeout_secs: 600,
            resize_timeout_secs: 1800,
        }
    }
}

impl CloudSettings {
    pub fn poll_config(&self) -> CloudPollConfig {
        CloudPollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            creation_timeout: Duration::from_secs(self.creation_timeout_secs),
            resize_timeout: Duration::from_secs(self.resize_timeout_secs),
        }
    }

    /// HTTP client settings, if an endpoint is configured
    pub fn http_config(&self) -> Option<HttpFilesystemApiConfig> {
        self.endpoint.as_ref().map(|endpoint| HttpFilesystemApiConfig {
            endpoint: endpoint.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

// =============================================================================
// Scratch Mount Settings
// =============================================================================

/// Where and how shared filesystems are mounted for sub-path management
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScratchSettings {
    pub root: PathBuf,
    pub fs_type: String,
    pub mount_options: Vec<String>,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/fsx-volume-driver/scratch"),
            fs_type: "lustre".to_string(),
            mount_options: Vec::new(),
        }
    }
}

impl From<&ScratchSettings> for ScratchConfig {
    fn from(settings: &ScratchSettings) -> Self {
        ScratchConfig {
            root: settings.root.clone(),
            fs_type: settings.fs_type.clone(),
            mount_options: settings.mount_options.clone(),
        }
    }
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    pub cloud: CloudSettings,
    pub scratch: ScratchSettings,
    /// Overall deadline of one manager operation
    pub operation_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cloud: CloudSettings::default(),
            scratch: ScratchSettings::default(),
            operation_timeout_secs: 900,
        }
    }
}

impl DriverConfig {
    /// Load and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&raw)?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: DriverConfig = if raw.trim().is_empty() {
            DriverConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cloud.requestTimeoutSecs", self.cloud.request_timeout_secs),
            ("cloud.pollIntervalSecs", self.cloud.poll_interval_secs),
            ("cloud.creationTimeoutSecs", self.cloud.creation_timeout_secs),
            ("cloud.resizeTimeoutSecs", self.cloud.resize_timeout_secs),
            ("operationTimeoutSecs", self.operation_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Configuration(format!("{} must be positive", name)));
        }

        let interval = self.cloud.poll_interval_secs;
        if interval > self.cloud.creation_timeout_secs || interval > self.cloud.resize_timeout_secs {
            return Err(Error::Configuration(format!(
                "cloud.pollIntervalSecs ({}) exceeds a poll timeout",
                interval
            )));
        }

        if let Some(endpoint) = &self.cloud.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::Configuration(format!(
                    "cloud.endpoint must be an http(s) URL, got {}",
                    endpoint
                )));
            }
        }

        if self.scratch.fs_type.is_empty() {
            return Err(Error::Configuration("scratch.fsType must not be empty".into()));
        }

        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
