//! Single agent
//!
//! Wraps one backend and a system prompt, and enforces the agent-scope
//! budget around every streaming call.

use crate::backend::{ChatMessage, Role, SharedBackend, StreamOptions, ToolSpec};
use crate::budget::{BudgetBreach, BudgetKind, BudgetScope, BudgetTracker};
use crate::chunk::{ChunkStream, DoneStatus, StreamChunk};
use crate::config::TimeoutConfig;
use crate::usage::{BackendStatus, TokenUsage};
use async_stream::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout_at;

/// Construction-time binding of an agent to its backend
#[derive(Clone)]
pub struct AgentConfig {
    /// Unique agent identifier, used as the `source` of every chunk
    pub id: String,

    /// Provider capability
    pub backend: SharedBackend,

    /// System prompt prepended to every conversation
    pub system_message: String,

    /// Ceilings replacing the orchestrator's agent-scope defaults
    pub timeout_config: Option<TimeoutConfig>,

    /// Generation options passed to the backend
    pub options: StreamOptions,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, backend: SharedBackend, system_message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend,
            system_message: system_message.into(),
            timeout_config: None,
            options: StreamOptions::default(),
        }
    }

    pub fn with_timeout_config(mut self, config: TimeoutConfig) -> Self {
        self.timeout_config = Some(config);
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }
}

/// Snapshot of an agent's accounting
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub id: String,
    #[serde(flatten)]
    pub backend: BackendStatus,
}

/// Budget-aware wrapper around one backend
pub struct SingleAgent {
    id: String,
    backend: SharedBackend,
    system_message: String,
    timeout_override: Option<TimeoutConfig>,
    options: StreamOptions,
    usage: Arc<Mutex<TokenUsage>>,
}

impl SingleAgent {
    /// Create an agent with default options
    pub fn new(id: impl Into<String>, backend: SharedBackend, system_message: impl Into<String>) -> Self {
        Self::from_config(AgentConfig::new(id, backend, system_message))
    }

    pub fn from_config(config: AgentConfig) -> Self {
        let usage = TokenUsage::for_backend(config.backend.provider_name(), config.backend.model());
        Self {
            id: config.id,
            backend: config.backend,
            system_message: config.system_message,
            timeout_override: config.timeout_config,
            options: config.options,
            usage: Arc::new(Mutex::new(usage)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    /// Agent-specific ceilings, if any
    pub fn timeout_override(&self) -> Option<&TimeoutConfig> {
        self.timeout_override.as_ref()
    }

    /// Copy of the accumulated usage
    pub fn token_usage(&self) -> TokenUsage {
        self.usage.lock().clone()
    }

    pub fn reset_token_usage(&self) {
        self.usage.lock().reset();
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id.clone(),
            backend: BackendStatus {
                provider: self.backend.provider_name().to_string(),
                model: self.backend.model().to_string(),
                token_usage: self.token_usage(),
            },
        }
    }

    /// Respond using this agent's own ceilings, or the defaults
    pub fn respond(&self, conversation: Vec<ChatMessage>, tools: Option<Vec<ToolSpec>>) -> ChunkStream {
        self.respond_within(conversation, tools, &TimeoutConfig::default())
    }

    /// Respond, using `defaults` unless the agent carries its own ceilings.
    ///
    /// The returned stream forwards backend chunks tagged with the agent id
    /// and checks the agent budget after each one. Backend failures become a
    /// single `error` chunk that ends the stream. A crossed budget cuts the
    /// backend off and ends with an `error` chunk followed by `done`
    /// (`degraded` with fallback, `aborted` without).
    pub fn respond_within(
        &self,
        conversation: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
        defaults: &TimeoutConfig,
    ) -> ChunkStream {
        let timeouts = self.timeout_override.unwrap_or(*defaults);
        let limits = timeouts.agent_limits();
        let fallback = timeouts.enable_timeout_fallback;
        let messages = self.build_messages(conversation);
        let id = self.id.clone();
        let backend = self.backend.clone();
        let options = self.options.clone();
        let usage = self.usage.clone();

        Box::pin(stream! {
            let mut budget = BudgetTracker::start(BudgetScope::Agent, limits);
            let deadline = budget.deadline();
            let model = options.model.clone().unwrap_or_else(|| backend.model().to_string());
            tracing::info!(agent = %id, provider = backend.provider_name(), %model, "agent started");

            let breach = 'run: {
                let mut inner = match timeout_at(deadline, backend.stream(messages, tools, &options)).await {
                    Err(_) => break 'run BudgetBreach::new(BudgetScope::Agent, BudgetKind::Time),
                    Ok(Err(e)) => {
                        tracing::warn!(agent = %id, error = %e, "backend failed to start");
                        yield StreamChunk::error(e.to_string(), id.as_str());
                        return;
                    }
                    Ok(Ok(inner)) => inner,
                };

                loop {
                    let chunk = match timeout_at(deadline, inner.next()).await {
                        Err(_) => break 'run BudgetBreach::new(BudgetScope::Agent, BudgetKind::Time),
                        Ok(None) => {
                            tracing::debug!(agent = %id, "backend ended without done");
                            yield StreamChunk::done(DoneStatus::Completed, id.as_str());
                            return;
                        }
                        Ok(Some(Err(e))) => {
                            tracing::warn!(agent = %id, error = %e, "backend failed");
                            yield StreamChunk::error(e.to_string(), id.as_str());
                            return;
                        }
                        Ok(Some(Ok(chunk))) => chunk.with_source(id.as_str()),
                    };

                    budget.record(&chunk);
                    if let Some(reported) = chunk.usage {
                        let cost = backend.calculate_cost(reported.input_tokens, reported.output_tokens, &model);
                        usage.lock().add_usage(reported.input_tokens, reported.output_tokens, cost);
                    }

                    if chunk.is_error() {
                        tracing::warn!(agent = %id, error = chunk.error.as_deref().unwrap_or(""), "backend reported error");
                        yield chunk;
                        return;
                    }
                    if chunk.is_done() {
                        tracing::info!(agent = %id, tokens = budget.tokens(), "agent finished");
                        yield chunk;
                        return;
                    }

                    yield chunk;

                    if let Err(breach) = budget.check() {
                        break 'run breach;
                    }
                }
            };

            // The backend stream has been dropped at this point
            let message = budget.describe(breach, &id);
            tracing::warn!(agent = %id, %breach, fallback, "{}", message);
            yield StreamChunk::budget_error(breach, message, id.as_str());
            let status = if fallback { DoneStatus::Degraded } else { DoneStatus::Aborted };
            yield StreamChunk::done(status, id.as_str());
        })
    }

    /// Prepend the system prompt unless the conversation brings its own
    fn build_messages(&self, conversation: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let has_system = conversation.iter().any(|m| m.role == Role::System);
        if has_system || self.system_message.is_empty() {
            return conversation;
        }

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage::system(self.system_message.clone()));
        messages.extend(conversation);
        messages
    }
}
