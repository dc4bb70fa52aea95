use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid max_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("invalid max_subagent_depth: {0}. Must be at least 1")]
    InvalidMaxSubagentDepth(u32),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("invalid per_chat_concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.orchestra/config.yaml` (project config)
    /// 3. `.orchestra/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`ORCHESTRA_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".orchestra/config.yaml"))
            .merge(Yaml::file(".orchestra/local.yaml"))
            .merge(Env::prefixed("ORCHESTRA_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.swarm.max_agents == 0 || config.swarm.max_agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(config.swarm.max_agents));
        }

        if config.swarm.max_subagent_depth == 0 {
            return Err(ConfigError::InvalidMaxSubagentDepth(config.swarm.max_subagent_depth));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.background_tasks.per_chat_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(config.background_tasks.per_chat_concurrency));
        }

        for server in &config.mcp_servers {
            if server.name.is_empty() {
                return Err(ConfigError::ValidationFailed("MCP server name cannot be empty".to_string()));
            }
            if server.command.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "MCP server '{}' command cannot be empty",
                    server.name
                )));
            }
        }

        Ok(())
    }
}
