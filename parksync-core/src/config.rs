//! Sync configuration
//!
//! Loaded once at startup and injected into every component; nothing in the
//! core reads process-wide settings on its own.
//!
//! Lookup order:
//! - `$PARKSYNC_CONFIG`
//! - `./parksync.yaml`
//! - `<config dir>/parksync/config.yaml`
//!
//! `PARKSYNC_BASE_URL` and `PARKSYNC_TOKEN` override whatever the file says.

use crate::derive::DeriveConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub bearer_token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    #[serde(with = "humantime_serde")]
    pub recent_window: Duration,
    #[serde(with = "humantime_serde")]
    pub recent_group_window: Duration,
    #[serde(with = "humantime_serde")]
    pub default_interval: Duration,
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub endpoint: String,
    pub id_field: String,
    #[serde(default, with = "humantime_serde::option")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub collection_keys: Vec<String>,
}

impl ResourceConfig {
    pub fn new(name: &str, endpoint: &str, id_field: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            id_field: id_field.to_string(),
            interval: None,
            collection_keys: Vec::new(),
        }
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn keys(mut self, keys: &[&str]) -> Self {
        self.collection_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout: Duration::from_secs(10),
            bearer_token: None,
            max_age: Duration::from_secs(60),
            recent_window: Duration::from_secs(5 * 60),
            recent_group_window: Duration::from_secs(30 * 60),
            default_interval: Duration::from_secs(10),
            resources: vec![
                ResourceConfig::new("flow-control", "/flow-control", "area_id")
                    .every(Duration::from_secs(10))
                    .keys(&["flow_control", "areas"]),
                ResourceConfig::new("realtime", "/realtime-monitor", "area_id")
                    .every(Duration::from_secs(5))
                    .keys(&["areas", "regions"]),
                ResourceConfig::new("trajectories", "/trajectories", "trajectory_id")
                    .every(Duration::from_secs(30))
                    .keys(&["trajectories"]),
                ResourceConfig::new("logs", "/logs", "log_id")
                    .every(Duration::from_secs(10))
                    .keys(&["logs"]),
                ResourceConfig::new("devices", "/devices", "device_id")
                    .every(Duration::from_secs(30))
                    .keys(&["devices"]),
                ResourceConfig::new("indicators", "/indicators", "indicator_id")
                    .every(Duration::from_secs(30))
                    .keys(&["indicators"]),
                ResourceConfig::new("environment", "/environment-data", "data_id")
                    .every(Duration::from_secs(5))
                    .keys(&["readings"]),
            ],
        }
    }
}

impl SyncConfig {
    /// Resolves the config file, applies environment overrides and validates.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::locate() {
            Some(path) => {
                info!("loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                warn!("no parksync configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PARKSYNC_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            warn!("PARKSYNC_CONFIG points to missing file {}", path.display());
        }
        let local = PathBuf::from("parksync.yaml");
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("parksync").join("config.yaml"))
            .filter(|p| p.exists())
    }

    /// Parses a YAML or TOML file by extension; an empty file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(&text).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PARKSYNC_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("PARKSYNC_TOKEN") {
            self.bearer_token = (!token.trim().is_empty()).then_some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url is empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        if self.default_interval.is_zero() {
            return Err(ConfigError::Invalid("default_interval must be greater than zero".into()));
        }
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate resource name '{}'",
                    resource.name
                )));
            }
            if resource.id_field.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "resource '{}' has an empty id_field",
                    resource.name
                )));
            }
            if resource.interval.is_some_and(|i| i.is_zero()) {
                return Err(ConfigError::Invalid(format!(
                    "resource '{}' has a zero polling interval",
                    resource.name
                )));
            }
        }
        Ok(())
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn interval_for(&self, resource: &ResourceConfig) -> Duration {
        resource.interval.unwrap_or(self.default_interval)
    }

    pub fn derive_config(&self) -> DeriveConfig {
        DeriveConfig {
            recent_window: self.recent_window,
            recent_group_window: self.recent_group_window,
        }
    }
}
