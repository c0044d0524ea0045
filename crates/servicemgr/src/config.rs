//! Configuration file support for servicemgrd.
//!
//! Loads and validates the daemon configuration from TOML.
//! Default location: /etc/lb/servicemgrd.toml

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use lb_map::RawLbId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/lb/servicemgrd.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifier space sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdLimits {
    /// Largest service ID the allocator may hand out
    #[serde(default = "default_max_id")]
    pub max_service_id: RawLbId,

    /// Largest backend ID the allocator may hand out
    #[serde(default = "default_max_id")]
    pub max_backend_id: RawLbId,
}

/// Startup recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Rebuild the registry from the forwarding table at startup
    #[serde(default = "default_restore_on_start")]
    pub restore_on_start: bool,
}

/// Periodic re-application of the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between passes; 0 runs a single pass and exits
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

/// Complete servicemgrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceManagerConfig {
    #[serde(default)]
    pub ids: IdLimits,

    #[serde(default)]
    pub restore: RestoreConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_id() -> RawLbId {
    RawLbId::MAX
}

fn default_restore_on_start() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IdLimits {
    fn default() -> Self {
        Self {
            max_service_id: default_max_id(),
            max_backend_id: default_max_id(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            restore_on_start: default_restore_on_start(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ServiceManagerConfig {
    /// Load configuration from file, falling back to defaults if the file
    /// does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Interval between reconcile passes, or `None` for a single pass.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        match self.reconcile.interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ids.max_service_id == 0 {
            return Err(ConfigError::Invalid(
                "ids.max_service_id must be > 0".to_string(),
            ));
        }

        if self.ids.max_backend_id == 0 {
            return Err(ConfigError::Invalid(
                "ids.max_backend_id must be > 0".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a configuration read from `path` and records whether it
    /// was accepted on the audit trail.
    pub fn validate_loaded(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref().display().to_string();
        match self.validate() {
            Ok(()) => {
                audit_log!(
                    AuditRecord::new(AuditCategory::ConfigurationChange, "ServiceManagerConfig", "load")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(path)
                        .with_object_type("config_file")
                        .with_details(serde_json::json!({
                            "max_service_id": self.ids.max_service_id,
                            "max_backend_id": self.ids.max_backend_id,
                            "restore_on_start": self.restore.restore_on_start,
                            "reconcile_interval_secs": self.reconcile.interval_secs,
                        }))
                );
                Ok(())
            }
            Err(e) => {
                audit_log!(
                    AuditRecord::new(AuditCategory::ConfigurationChange, "ServiceManagerConfig", "load")
                        .with_object_id(path)
                        .with_object_type("config_file")
                        .with_error(e.to_string())
                );
                Err(e)
            }
        }
    }
}
