//! Configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/gitnotes/config.toml)
//! 3. Environment variables (GITNOTES_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix
const ENV_PREFIX: &str = "GITNOTES";

/// Default number of push attempts before giving up
pub const DEFAULT_PUSH_ATTEMPTS: u32 = 3;

/// Default number of backend calls a bulk read keeps in flight
pub const DEFAULT_BULK_CONCURRENCY: usize = 10;

/// Errors loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseStr(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Repository to operate on (current directory when unset)
    #[serde(default)]
    pub repo_path: Option<PathBuf>,

    /// Git executable
    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Namespace used when none is given on the command line
    #[serde(default)]
    pub namespace: String,

    /// Remote used by fetch and push
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Push attempts before a concurrent writer is reported as a failure
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,

    /// Base of the quadratic backoff between push attempts
    #[serde(default = "default_push_backoff_ms")]
    pub push_backoff_ms: u64,

    /// Maximum backend calls in flight during a bulk read
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,

    /// Kill a backend call that runs longer than this
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Resolve commit references against the repository before use
    #[serde(default = "default_true")]
    pub verify_refs: bool,

    /// Identity recorded on notes commits
    #[serde(default)]
    pub author_name: Option<String>,

    #[serde(default)]
    pub author_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_path: None,
            git_binary: default_git_binary(),
            namespace: String::new(),
            remote: default_remote(),
            push_attempts: DEFAULT_PUSH_ATTEMPTS,
            push_backoff_ms: default_push_backoff_ms(),
            bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
            command_timeout_secs: None,
            verify_refs: true,
            author_name: None,
            author_email: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_var("REPO") {
            self.repo_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Some(val) = env_var("NAMESPACE") {
            self.namespace = val;
        }

        if let Some(val) = env_var("REMOTE") {
            if !val.is_empty() {
                self.remote = val;
            }
        }

        if let Some(val) = env_var("GIT") {
            if !val.is_empty() {
                self.git_binary = val;
            }
        }

        // Unparseable numbers are ignored rather than clobbering the file value
        if let Some(attempts) = env_var("PUSH_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.push_attempts = attempts;
        }

        if let Some(limit) = env_var("BULK_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.bulk_concurrency = limit;
        }
    }

    /// Set a single key from its string form (as typed on the command line)
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let optional = |v: &str| {
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        };

        match key {
            "repo_path" => self.repo_path = optional(value).map(PathBuf::from),
            "git_binary" => self.git_binary = value.to_string(),
            "namespace" => self.namespace = value.to_string(),
            "remote" => self.remote = value.to_string(),
            "push_attempts" => self.push_attempts = value.parse().map_err(|_| invalid())?,
            "push_backoff_ms" => self.push_backoff_ms = value.parse().map_err(|_| invalid())?,
            "bulk_concurrency" => self.bulk_concurrency = value.parse().map_err(|_| invalid())?,
            "command_timeout_secs" => {
                self.command_timeout_secs = match value {
                    "" => None,
                    v => Some(v.parse().map_err(|_| invalid())?),
                }
            }
            "verify_refs" => {
                self.verify_refs = match value.to_ascii_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(invalid()),
                }
            }
            "author_name" => self.author_name = optional(value),
            "author_email" => self.author_email = optional(value),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the config file path
    ///
    /// Can be overridden with GITNOTES_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gitnotes")
            .join("config.toml")
    }

    /// Delay base for the quadratic push backoff
    pub fn push_backoff(&self) -> Duration {
        Duration::from_millis(self.push_backoff_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix)).ok()
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_push_attempts() -> u32 {
    DEFAULT_PUSH_ATTEMPTS
}

fn default_push_backoff_ms() -> u64 {
    100
}

fn default_bulk_concurrency() -> usize {
    DEFAULT_BULK_CONCURRENCY
}

fn default_true() -> bool {
    true
}
