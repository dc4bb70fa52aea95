//! AgentDefinition: static description of a spawnable subagent role, as
//! registered with the `AgentRegistry`.

use serde::{Deserialize, Serialize};

/// A named, reusable subagent role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    /// Model alias, e.g. "sonnet", "opus"; resolved by the `LlmProvider`.
    pub model_alias: String,
    /// Names of tools this agent is permitted to call. Empty means "all".
    pub tool_whitelist: Vec<String>,
    pub color: Option<String>,
    pub system_prompt: String,
    /// Set when the definition was contributed by a plugin rather than the
    /// operator's own project configuration.
    pub plugin_id: Option<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model_alias: "sonnet".to_string(),
            tool_whitelist: Vec::new(),
            color: None,
            system_prompt: system_prompt.into(),
            plugin_id: None,
        }
    }

    pub fn with_model_alias(mut self, alias: impl Into<String>) -> Self {
        self.model_alias = alias.into();
        self
    }

    pub fn with_tool_whitelist(mut self, tools: Vec<String>) -> Self {
        self.tool_whitelist = tools;
        self
    }

    pub fn with_plugin_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.tool_whitelist.is_empty() || self.tool_whitelist.iter().any(|t| t == tool_name)
    }
}
