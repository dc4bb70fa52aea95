//! Configuration management infrastructure.
//!
//! Hierarchical configuration using figment: YAML file loading, environment
//! variable overrides, and type-safe, validated config structs.

mod loader;

pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".orchestra/orchestra.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub log_dir: Option<PathBuf>,
    pub enable_stdout: bool,
    pub rotation: RotationPolicy,
    pub retention_days: i64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalConfig {
    pub default_ttl_ms: i64,
    pub auto_deny_on_expiry: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 120_000,
            auto_deny_on_expiry: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwarmConfig {
    pub max_agents: usize,
    pub max_subagent_depth: u32,
    pub default_subagent_timeout_ms: u64,
    pub default_swarm_timeout_ms: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_agents: 10,
            max_subagent_depth: 3,
            default_subagent_timeout_ms: 300_000,
            default_swarm_timeout_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackgroundTasksConfig {
    /// Max concurrent background tasks per chat session.
    pub per_chat_concurrency: usize,
    pub progress_throttle_ms: u64,
    /// How long the message queue's collect mode holds incoming messages
    /// before auto-flushing them as a single batch.
    pub collect_window_ms: u64,
}

impl Default for BackgroundTasksConfig {
    fn default() -> Self {
        Self {
            per_chat_concurrency: 3,
            progress_throttle_ms: 30_000,
            collect_window_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Root configuration, assembled by [`ConfigLoader`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub retry: RetryConfig,
    pub approval: ApprovalConfig,
    pub swarm: SwarmConfig,
    pub background_tasks: BackgroundTasksConfig,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            approval: ApprovalConfig::default(),
            swarm: SwarmConfig::default(),
            background_tasks: BackgroundTasksConfig::default(),
            mcp_servers: Vec::new(),
        }
    }
}
