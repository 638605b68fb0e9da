//! Configuration loader with environment variable expansion
//!
//! Loads configuration from `.chorus.toml` in the working directory or the
//! user config directory.

use super::types::ChorusConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load configuration from various sources
///
/// Priority order:
/// 1. Project-level `.chorus.toml`
/// 2. User-level `~/.config/chorus/config.toml`
/// 3. Default configuration
pub fn load_config(project_dir: &Path) -> Result<ChorusConfig, ConfigError> {
    let project_config = project_dir.join(".chorus.toml");
    if project_config.exists() {
        return load_from_file(&project_config);
    }

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            return load_from_file(&user_config);
        }
    }

    tracing::debug!("no config file found, using defaults");
    Ok(apply_env_overrides(ChorusConfig::default()))
}

/// User-level config file location
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chorus").join("config.toml"))
}

/// Load configuration from a specific file
pub fn load_from_file(path: &Path) -> Result<ChorusConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), agents = config.agents.len(), "loaded config");
    Ok(config)
}

/// Parse configuration text, expanding `${VAR}` references
pub fn parse_config(content: &str) -> Result<ChorusConfig, ConfigError> {
    let mut config: ChorusConfig = toml::from_str(content)?;

    expand_env_vars(&mut config);

    config
        .timeout_settings
        .validate()
        .map_err(ConfigError::Invalid)?;

    Ok(apply_env_overrides(config))
}

/// Expand ${VAR} patterns in string values
fn expand_env_vars(config: &mut ChorusConfig) {
    for agent in &mut config.agents {
        let backend = &mut agent.backend;
        if let Some(api_key) = backend.api_key.as_deref() {
            backend.api_key = Some(expand_string(api_key));
        }
        if let Some(base_url) = backend.base_url.as_deref() {
            backend.base_url = Some(expand_string(base_url));
        }
    }
}

/// Expand environment variables in a single string
fn expand_string(s: &str) -> String {
    ENV_VAR
        .replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
}

/// Apply environment variable overrides
///
/// - OPENAI_API_KEY -> api_key of OpenAI agents without one
/// - OLLAMA_BASE_URL -> base_url of Ollama agents without one
fn apply_env_overrides(mut config: ChorusConfig) -> ChorusConfig {
    let openai_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
    let ollama_url = std::env::var("OLLAMA_BASE_URL").ok().filter(|u| !u.is_empty());

    for agent in &mut config.agents {
        let backend = &mut agent.backend;
        let provider = backend
            .kind
            .clone()
            .unwrap_or_else(|| crate::backend::provider_from_model(&backend.model).to_string());

        let unresolved = |value: &Option<String>| {
            value
                .as_deref()
                .map_or(true, |v| v.is_empty() || ENV_VAR.is_match(v))
        };

        match provider.as_str() {
            "openai" if unresolved(&backend.api_key) => {
                if let Some(key) = &openai_key {
                    backend.api_key = Some(key.clone());
                }
            }
            "ollama" if backend.base_url.is_none() => {
                backend.base_url = ollama_url.clone();
            }
            _ => {}
        }
    }

    config
}

/// Create a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Chorus Configuration
# Place this file in your project root as .chorus.toml
# or in ~/.config/chorus/config.toml for global settings

# Conservative budgets to prevent runaway costs
[timeout_settings]
orchestrator_timeout_seconds = 600   # 10 minutes max coordination
orchestrator_max_tokens = 75000      # 75k tokens total limit
agent_timeout_seconds = 120          # 2 minutes per agent
agent_max_tokens = 20000             # 20k tokens per agent
enable_timeout_fallback = true       # Always generate an answer

[orchestrator]
# first_completed or longest
synthesis = "first_completed"

[[agents]]
id = "agent1"
system_message = "You are a helpful assistant."

[agents.backend]
type = "openai"
model = "gpt-4o-mini"
api_key = "${OPENAI_API_KEY}"

[[agents]]
id = "agent2"
system_message = "You are a careful reviewer."

[agents.backend]
type = "ollama"
model = "llama3.2"
base_url = "http://localhost:11434"

[agents.timeout_settings]
agent_timeout_seconds = 60
agent_max_tokens = 8000
"#
}
