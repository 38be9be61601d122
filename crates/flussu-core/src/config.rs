//! Flussu configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FlussuError, Result};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "FLUSSU_CONFIG";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlussuConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub timedcall: TimedCallConfig,
}

impl FlussuConfig {
    /// Load config from `$FLUSSU_CONFIG` or the default path (~/.flussu/config.toml).
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(|p| PathBuf::from(shellexpand::tilde(&p).to_string()))
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlussuError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FlussuError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Flussu home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flussu")
    }

    /// Dot-notation lookup over the effective values, e.g. `timedcall.base_url`.
    pub fn lookup(&self, key: &str) -> Option<toml::Value> {
        let root = toml::Value::try_from(self).ok()?;
        key.split('.')
            .filter(|part| !part.is_empty())
            .try_fold(root, |node, part| match node {
                toml::Value::Table(mut table) => table.remove(part),
                _ => None,
            })
    }
}

/// Work-record store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.flussu/flussu.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// How a record's call target is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Session reference wins; otherwise start the workflow fresh.
    #[default]
    PreferSession,
    /// Both workflow and session references must be present.
    RequireWorkflowAndSession,
}

impl std::fmt::Display for TargetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetPolicy::PreferSession => write!(f, "prefer_session"),
            TargetPolicy::RequireWorkflowAndSession => write!(f, "require_workflow_and_session"),
        }
    }
}

/// Timed-call dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedCallConfig {
    /// Workflow engine endpoint receiving the timed calls.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for one outbound call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy: TargetPolicy,
    /// Transport registry key.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Audit log file.
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Honour HTTP(S)_PROXY from the environment.
    #[serde(default = "bool_true")]
    pub use_proxy: bool,
}

fn default_base_url() -> String { "http://localhost/flussueng.php".into() }
fn default_timeout_secs() -> u64 { 30 }
fn default_transport() -> String { "http".into() }
fn default_log_path() -> String { "~/.flussu/logs/timedcall.log".into() }
fn default_user_agent() -> String { "Flussu-TimedCall/1.0".into() }
fn bool_true() -> bool { true }

impl Default for TimedCallConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            policy: TargetPolicy::default(),
            transport: default_transport(),
            log_path: default_log_path(),
            user_agent: default_user_agent(),
            use_proxy: true,
        }
    }
}

impl TimedCallConfig {
    /// Outbound call timeout. Zero is clamped to one second.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Audit log path with `~` expanded.
    pub fn expanded_log_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.log_path).to_string())
    }
}
