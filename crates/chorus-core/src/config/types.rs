//! Configuration types for Chorus
//!
//! Defines the structure of `.chorus.toml` configuration.

use crate::budget::BudgetLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// Budget ceilings shared by every agent unless overridden
    #[serde(default)]
    pub timeout_settings: TimeoutConfig,

    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Agents taking part in a run
    #[serde(default)]
    pub agents: Vec<AgentSettings>,
}

/// Time and token ceilings for agents and the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Wall-clock seconds one agent may stream
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_seconds: u64,

    /// Tokens one agent may consume
    #[serde(default = "default_agent_max_tokens")]
    pub agent_max_tokens: u64,

    /// Wall-clock seconds for the whole run
    #[serde(default = "default_orchestrator_timeout")]
    pub orchestrator_timeout_seconds: u64,

    /// Tokens for the whole run, summed over agents
    #[serde(default = "default_orchestrator_max_tokens")]
    pub orchestrator_max_tokens: u64,

    /// Produce a best-effort answer instead of failing when a budget is crossed
    #[serde(default = "default_enable_fallback")]
    pub enable_timeout_fallback: bool,
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_agent_max_tokens() -> u64 {
    20_000
}

fn default_orchestrator_timeout() -> u64 {
    600
}

fn default_orchestrator_max_tokens() -> u64 {
    75_000
}

fn default_enable_fallback() -> bool {
    true
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_timeout_seconds: default_agent_timeout(),
            agent_max_tokens: default_agent_max_tokens(),
            orchestrator_timeout_seconds: default_orchestrator_timeout(),
            orchestrator_max_tokens: default_orchestrator_max_tokens(),
            enable_timeout_fallback: default_enable_fallback(),
        }
    }
}

impl TimeoutConfig {
    pub fn agent_limits(&self) -> BudgetLimits {
        BudgetLimits::new(
            Duration::from_secs(self.agent_timeout_seconds),
            self.agent_max_tokens,
        )
    }

    pub fn orchestrator_limits(&self) -> BudgetLimits {
        BudgetLimits::new(
            Duration::from_secs(self.orchestrator_timeout_seconds),
            self.orchestrator_max_tokens,
        )
    }

    /// Apply command-line overrides, returning a new config
    pub fn with_overrides(mut self, overrides: &TimeoutOverrides) -> Self {
        if let Some(seconds) = overrides.agent_timeout_seconds {
            self.agent_timeout_seconds = seconds;
        }
        if let Some(tokens) = overrides.agent_max_tokens {
            self.agent_max_tokens = tokens;
        }
        if let Some(seconds) = overrides.orchestrator_timeout_seconds {
            self.orchestrator_timeout_seconds = seconds;
        }
        if let Some(tokens) = overrides.orchestrator_max_tokens {
            self.orchestrator_max_tokens = tokens;
        }
        if overrides.disable_fallback {
            self.enable_timeout_fallback = false;
        }
        self
    }

    /// Reject ceilings that would end every run immediately
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_timeout_seconds == 0 || self.orchestrator_timeout_seconds == 0 {
            return Err("timeouts must be greater than zero".to_string());
        }
        if self.agent_max_tokens == 0 || self.orchestrator_max_tokens == 0 {
            return Err("token limits must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Budget values supplied on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutOverrides {
    pub agent_timeout_seconds: Option<u64>,
    pub agent_max_tokens: Option<u64>,
    pub orchestrator_timeout_seconds: Option<u64>,
    pub orchestrator_max_tokens: Option<u64>,
    pub disable_fallback: bool,
}

impl TimeoutOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-agent `[agents.timeout_settings]` table.
///
/// Fields left out fall back to the run's `[timeout_settings]`, not to the
/// built-in defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTimeoutSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_timeout_fallback: Option<bool>,
}

impl AgentTimeoutSettings {
    /// Fill the unset fields from `base`
    pub fn merged_onto(&self, base: TimeoutConfig) -> TimeoutConfig {
        TimeoutConfig {
            agent_timeout_seconds: self.agent_timeout_seconds.unwrap_or(base.agent_timeout_seconds),
            agent_max_tokens: self.agent_max_tokens.unwrap_or(base.agent_max_tokens),
            orchestrator_timeout_seconds: self
                .orchestrator_timeout_seconds
                .unwrap_or(base.orchestrator_timeout_seconds),
            orchestrator_max_tokens: self.orchestrator_max_tokens.unwrap_or(base.orchestrator_max_tokens),
            enable_timeout_fallback: self.enable_timeout_fallback.unwrap_or(base.enable_timeout_fallback),
        }
    }

    /// Apply command-line overrides on top of the agent's own values
    pub fn with_overrides(mut self, overrides: &TimeoutOverrides) -> Self {
        if let Some(seconds) = overrides.agent_timeout_seconds {
            self.agent_timeout_seconds = Some(seconds);
        }
        if let Some(tokens) = overrides.agent_max_tokens {
            self.agent_max_tokens = Some(tokens);
        }
        if let Some(seconds) = overrides.orchestrator_timeout_seconds {
            self.orchestrator_timeout_seconds = Some(seconds);
        }
        if let Some(tokens) = overrides.orchestrator_max_tokens {
            self.orchestrator_max_tokens = Some(tokens);
        }
        if overrides.disable_fallback {
            self.enable_timeout_fallback = Some(false);
        }
        self
    }
}

/// How completed answers are combined into the run's final answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisKind {
    /// Answer of the first agent to finish
    #[default]
    FirstCompleted,
    /// Longest answer among agents that finished
    Longest,
}

/// Orchestrator section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default)]
    pub synthesis: SynthesisKind,
}

/// One `[[agents]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Unique agent identifier
    pub id: String,

    /// System prompt
    #[serde(default = "default_system_message")]
    pub system_message: String,

    /// Provider binding
    pub backend: BackendSettings,

    /// Per-agent ceilings layered over the shared ones
    #[serde(default)]
    pub timeout_settings: Option<AgentTimeoutSettings>,
}

fn default_system_message() -> String {
    "You are a helpful assistant.".to_string()
}

/// Provider settings for one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Provider type; detected from the model name when absent
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Model name
    pub model: String,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// API key (supports ${ENV_VAR} syntax)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL for the API
    #[serde(default)]
    pub base_url: Option<String>,
}

impl AgentSettings {
    /// Agent with the default system prompt
    pub fn new(id: &str, backend: BackendSettings) -> Self {
        Self {
            id: id.to_string(),
            system_message: default_system_message(),
            backend,
            timeout_settings: None,
        }
    }

    /// Ceilings for this agent given the run's shared ones
    pub fn effective_timeouts(&self, shared: &TimeoutConfig) -> Option<TimeoutConfig> {
        self.timeout_settings.map(|t| t.merged_onto(*shared))
    }
}

impl ChorusConfig {
    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<(), String> {
        if self.agents.is_empty() {
            return Err("at least one agent must be configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err("agent id must not be empty".to_string());
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(format!("duplicate agent id '{}'", agent.id));
            }
            if let Some(timeouts) = agent.effective_timeouts(&self.timeout_settings) {
                timeouts
                    .validate()
                    .map_err(|e| format!("agent '{}': {}", agent.id, e))?;
            }
        }

        self.timeout_settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_timeouts() {
        let config = TimeoutConfig::default();
        assert_eq!(config.agent_timeout_seconds, 120);
        assert_eq!(config.orchestrator_max_tokens, 75_000);
        assert!(config.enable_timeout_fallback);
        assert_eq!(config.agent_limits().timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = TimeoutOverrides {
            agent_timeout_seconds: Some(60),
            agent_max_tokens: Some(10_000),
            disable_fallback: true,
            ..Default::default()
        };
        let config = TimeoutConfig::default().with_overrides(&overrides);
        assert_eq!(config.agent_timeout_seconds, 60);
        assert_eq!(config.agent_max_tokens, 10_000);
        assert_eq!(config.orchestrator_timeout_seconds, 600);
        assert!(!config.enable_timeout_fallback);
        assert!(!overrides.is_empty());
        assert!(TimeoutOverrides::default().is_empty());
    }

    #[test]
    fn test_agent_override_inherits_run_settings() {
        let shared = TimeoutConfig {
            agent_timeout_seconds: 30,
            enable_timeout_fallback: false,
            ..Default::default()
        };
        let partial = AgentTimeoutSettings {
            agent_max_tokens: Some(500),
            ..Default::default()
        };
        let merged = partial.merged_onto(shared);
        assert_eq!(merged.agent_timeout_seconds, 30);
        assert_eq!(merged.agent_max_tokens, 500);
        assert!(!merged.enable_timeout_fallback);

        let overridden = partial.with_overrides(&TimeoutOverrides {
            agent_max_tokens: Some(100),
            ..Default::default()
        });
        assert_eq!(overridden.merged_onto(shared).agent_max_tokens, 100);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let backend = BackendSettings {
            model: "gpt-4o-mini".to_string(),
            ..Default::default()
        };
        let config = ChorusConfig {
            agents: vec![
                AgentSettings::new("a", backend.clone()),
                AgentSettings::new("a", backend),
            ],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err("duplicate agent id 'a'".to_string()));
    }

    #[test]
    fn test_validate_requires_agents() {
        assert!(ChorusConfig::default().validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = TimeoutConfig {
            agent_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
