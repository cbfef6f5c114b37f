//! Configuration management
//!
//! The engine reads this on startup and writes it back whenever the
//! management API changes rule or scanner settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::scanner::AlertThreshold;
use crate::scope::Scope;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner settings
    pub scanner: ScannerConfig,

    /// Management API settings
    pub api: ApiConfig,

    /// Operator scope
    pub scope: Scope,

    /// Persisted per-rule state, keyed by rule id
    pub rules: BTreeMap<String, RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Global passive scanning switch
    pub enabled: bool,

    /// Skip messages whose target is outside the scope
    pub scan_only_in_scope: bool,

    /// Skip traffic produced by locally hosted server components
    pub ignore_server_mode: bool,

    /// Alerts recorded per rule before further ones are dropped (0 = unlimited)
    pub max_alerts_per_rule: usize,

    /// Idle wait between queue checks in milliseconds
    pub idle_interval_ms: u64,

    /// Number of scan worker threads
    pub workers: usize,

    /// Rule invocations slower than this are logged (milliseconds)
    pub slow_rule_ms: u64,

    /// Queue bound (0 = unbounded)
    pub max_queue_depth: usize,

    /// Payloads retained by the in-memory message history
    pub history_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address for the control socket
    pub listen_addr: String,

    /// Control socket port (0 to disable)
    pub port: u16,
}

/// Persisted state of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub enabled: bool,
    pub threshold: AlertThreshold,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_only_in_scope: false,
            ignore_server_mode: true,
            max_alerts_per_rule: 0,
            idle_interval_ms: 5000,
            workers: 1,
            slow_rule_ms: 1000,
            max_queue_depth: 0,
            history_size: 10000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the default location
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            tracing::info!("No configuration file found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
            path: config_path.display().to_string(),
            source,
        })?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })?;

        tracing::debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.workers == 0 {
            return Err(ConfigError::ValidationError {
                field: "scanner.workers".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.scanner.idle_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                field: "scanner.idle_interval_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        for key in self.rules.keys() {
            if key.parse::<u32>().is_err() {
                return Err(ConfigError::ValidationError {
                    field: format!("rules.{}", key),
                    reason: "rule keys must be numeric ids".into(),
                });
            }
        }

        self.scope
            .validate()
            .map_err(|e| ConfigError::ValidationError {
                field: "scope".into(),
                reason: e.to_string(),
            })
    }

    /// Persisted rule state keyed by numeric id
    pub fn rule_settings(&self) -> BTreeMap<u32, RuleConfig> {
        self.rules
            .iter()
            .filter_map(|(k, v)| k.parse().ok().map(|id| (id, *v)))
            .collect()
    }

    pub fn set_rule_settings(&mut self, settings: BTreeMap<u32, RuleConfig>) {
        self.rules = settings
            .into_iter()
            .map(|(id, v)| (id.to_string(), v))
            .collect();
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "pscan", "pscan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "pscan", "pscan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}
