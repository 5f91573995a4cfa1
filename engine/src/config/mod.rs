//! Configuration management
//!
//! This module handles loading, validation, and management of the Trellis configuration.
//! Configuration is stored in TOML format at ~/.trellis/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level
//! - **transport**: controller URL, retry interval and budget, check mode
//! - **kinds**: optional table-driven resource kind descriptors
//!
//! Invalid values fail at load time, never later at first use.
//!
//! # Examples
//!
//! ```no_run
//! use trellis_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Controller: {}", config.transport.base_url);
//! # Ok(())
//! # }
//! ```

use crate::planner::FieldKind;
use crate::transport::TransportSettings;
use sdk::errors::ReconcileError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Transport and retry settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource kind descriptors (optional)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<KindConfig>,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the controller API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds to wait between attempts of a failing operation
    #[serde(default = "default_send_interval")]
    pub send_interval_secs: u64,

    /// Retry budget per operation, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Limit for a single HTTP call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Budget for reads that must reach the controller even in check mode
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,

    /// Simulate every write instead of sending it
    #[serde(default)]
    pub check_mode: bool,

    /// Skip retry sleeps (tests only)
    #[serde(default)]
    pub fast_test: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            send_interval_secs: default_send_interval(),
            timeout_secs: default_timeout(),
            request_timeout_secs: default_request_timeout(),
            refresh_timeout_secs: default_refresh_timeout(),
            check_mode: false,
            fast_test: false,
        }
    }
}

impl TransportConfig {
    /// Validated coordinator settings
    pub fn settings(&self) -> Result<TransportSettings, ReconcileError> {
        Ok(
            TransportSettings::new(self.send_interval_secs, self.timeout_secs)?
                .with_check_mode(self.check_mode)
                .with_fast_test(self.fast_test),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Table-driven resource kind descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindConfig {
    /// Kind name (e.g., "fabric")
    pub name: String,

    pub name_field: String,
    pub type_field: String,
    pub deploy_field: String,

    /// Key under which the controller nests resource fields
    #[serde(default)]
    pub fields_key: Option<String>,

    /// Caller field name -> controller field name
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Fields that are never compared or sent as updates
    #[serde(default)]
    pub client_only: Vec<String>,

    /// Explicit comparison kinds by controller field name
    #[serde(default)]
    pub field_kinds: BTreeMap<String, FieldKind>,

    pub paths: PathsConfig,
}

/// Endpoint path templates; `{name}` and `{type}` are substituted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub inventory: String,
    pub update: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub delete: Option<String>,
    #[serde(default)]
    pub save: Option<String>,
    #[serde(default)]
    pub deploy: Option<String>,
}

// serde reports wrong types and out-of-range integers with these prefixes
fn is_type_mismatch(message: &str) -> bool {
    ["invalid type", "invalid value", "unknown variant"]
        .iter()
        .any(|prefix| message.starts_with(prefix))
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "https://localhost/api/v1".to_string()
}

fn default_send_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

fn default_refresh_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from the default location (~/.trellis/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, ReconcileError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ReconcileError> {
        let contents = fs::read_to_string(path)?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    ///
    /// Malformed TOML is a `Config` error. A well-formed value of the wrong
    /// type or outside its integer range is `InvalidValue`.
    pub fn from_toml_str(contents: &str) -> Result<Self, ReconcileError> {
        let table: toml::Table = contents
            .parse()
            .map_err(|e| ReconcileError::Config(format!("Failed to parse config: {}", e)))?;

        let config: Config = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| {
                let message = e.message().trim().to_string();
                if is_type_mismatch(&message) {
                    ReconcileError::invalid_value("config", message)
                } else {
                    ReconcileError::Config(format!("Failed to load config: {}", message))
                }
            })?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, ReconcileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config = Self::default_config();
        config.validate()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| ReconcileError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.trellis/config.toml)
    fn default_config_path() -> Result<PathBuf, ReconcileError> {
        let home = dirs::home_dir().ok_or_else(|| {
            ReconcileError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".trellis").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            transport: TransportConfig::default(),
            kinds: Vec::new(),
        }
    }

    /// Kind descriptor by name
    pub fn kind(&self, name: &str) -> Option<&KindConfig> {
        self.kinds.iter().find(|kind| kind.name == name)
    }

    fn validate(&self) -> Result<(), ReconcileError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(ReconcileError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !self.transport.base_url.starts_with("http://")
            && !self.transport.base_url.starts_with("https://")
        {
            return Err(ReconcileError::invalid_value(
                "transport.base_url",
                format!("'{}' is not an http(s) URL", self.transport.base_url),
            ));
        }

        self.transport.settings()?;

        for (field, value) in [
            ("transport.request_timeout_secs", self.transport.request_timeout_secs),
            ("transport.refresh_timeout_secs", self.transport.refresh_timeout_secs),
        ] {
            if value == 0 {
                return Err(ReconcileError::invalid_value(field, "must be at least 1 second"));
            }
        }

        let mut names = std::collections::BTreeSet::new();
        for kind in &self.kinds {
            if !names.insert(kind.name.as_str()) {
                return Err(ReconcileError::Config(format!(
                    "Resource kind '{}' is defined more than once",
                    kind.name
                )));
            }
            if kind.paths.inventory.is_empty() || kind.paths.update.is_empty() {
                return Err(ReconcileError::Config(format!(
                    "Resource kind '{}' needs inventory and update paths",
                    kind.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.transport.send_interval_secs, 5);
        assert_eq!(config.transport.timeout_secs, 300);
        assert!(!config.transport.check_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.transport.refresh_timeout_secs, 10);
        assert!(config.kinds.is_empty());
    }

    #[test]
    fn test_zero_send_interval_rejected() {
        let err = Config::from_toml_str("[transport]\nsend_interval_secs = 0\n").unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidValue { ref field, .. } if field == "send_interval"));
    }

    #[test]
    fn test_non_boolean_check_mode_rejected() {
        let err = Config::from_toml_str("[transport]\ncheck_mode = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidValue { ref reason, .. } if reason.contains("bool")));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = Config::from_toml_str("[transport\ntimeout_secs = 5\n").unwrap_err();
        assert!(matches!(err, ReconcileError::Config(ref m) if m.contains("parse")));
    }

    #[test]
    fn test_unknown_field_kind_rejected() {
        let contents = r#"
[[kinds]]
name = "fabric"
name_field = "NAME"
type_field = "TYPE"
deploy_field = "DEPLOY"

[kinds.field_kinds]
GW_MAC = "ipv6"

[kinds.paths]
inventory = "/fabrics"
update = "/fabrics/{name}"
"#;
        let err = Config::from_toml_str(contents).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidValue { .. }));
    }

    #[test]
    fn test_kind_without_paths_is_config_error() {
        let contents = "[[kinds]]\nname = \"fabric\"\nname_field = \"NAME\"\ntype_field = \"TYPE\"\ndeploy_field = \"DEPLOY\"\n";
        let err = Config::from_toml_str(contents).unwrap_err();
        assert!(matches!(err, ReconcileError::Config(ref m) if m.contains("paths")));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Config::from_toml_str("[core]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ReconcileError::Config(ref m) if m.contains("loud")));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.transport.base_url, deserialized.transport.base_url);
    }
}
