//! Configuration management.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::controller::protocol::LIST_FORMAT;

/// File name of the controller looked up beside the running binary.
pub const DEFAULT_CONTROLLER: &str = "EndPointController.exe";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Controller executable configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Path to the controller; defaults to `EndPointController.exe` next to
    /// this binary
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Arguments that make the controller print the device list
    #[serde(default = "default_list_args")]
    pub list_args: Vec<String>,
    /// Upper bound on a single controller invocation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_list_args() -> Vec<String> {
    vec!["-f".to_string(), LIST_FORMAT.to_string()]
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            path: None,
            list_args: default_list_args(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The controller path to use, resolving the default location.
    ///
    /// A bare name falls back to the working directory when nothing sits
    /// next to the running binary; `PATH` is never searched.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }

        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONTROLLER)))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTROLLER))
    }
}

/// Persisted state configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Store state in this JSON file instead of the platform default
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Save after every change rather than only at shutdown
    #[serde(default = "default_write_through")]
    pub write_through: bool,
}

fn default_write_through() -> bool {
    true
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file: None,
            write_through: default_write_through(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub state: StateConfig,
    /// Fallback tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            state: StateConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, using defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let dirs = project_dirs().ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "AudioSwitcher", "AudioSwitcher")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.controller.list_args, vec!["-f", "%d|%ws|%d|%d"]);
        assert_eq!(config.controller.timeout(), Duration::from_secs(5));
        assert!(config.state.write_through);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[controller]\npath = \"/opt/ctl/EndPointController\"\ntimeout_ms = 250\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(
            config.controller.resolved_path(),
            PathBuf::from("/opt/ctl/EndPointController")
        );
        assert_eq!(config.controller.timeout_ms, 250);
        assert_eq!(config.controller.list_args, default_list_args());
        assert_eq!(config.state, StateConfig::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "controller = 3").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
