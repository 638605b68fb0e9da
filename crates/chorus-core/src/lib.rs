//! Chorus Core - multi-agent orchestration library
//!
//! This crate provides the UI-agnostic functionality behind the `chorus` CLI:
//! - StreamChunk protocol shared by backends, agents and the orchestrator
//! - Budget tracking (time and token ceilings per agent and per run)
//! - LLM backends (OpenAI Responses API, Ollama)
//! - Single agents wrapping one backend each
//! - The orchestrator merging concurrent agent streams into one
//! - Configuration loading
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  StreamChunk  ┌──────────────┐  StreamChunk  ┌──────────────┐
//! │ Backend  │ ─────────────→│ SingleAgent  │ ─────────────→│              │
//! └──────────┘               │ (agent scope)│               │ Orchestrator │ ──→ caller
//! ┌──────────┐               ├──────────────┤               │ (run scope)  │
//! │ Backend  │ ─────────────→│ SingleAgent  │ ─────────────→│              │
//! └──────────┘               └──────────────┘               └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chorus_core::{Orchestrator, load_config};
//! use futures::StreamExt;
//!
//! let config = load_config(&cwd)?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//!
//! let mut stream = orchestrator.chat_simple("What is a monad?");
//! while let Some(chunk) = stream.next().await {
//!     if chunk.is_content() {
//!         print!("{}", chunk.text());
//!     }
//! }
//! ```

pub mod agent;
pub mod backend;
pub mod budget;
pub mod chunk;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod usage;

// Re-export commonly used types
pub use agent::{AgentConfig, AgentStatus, SingleAgent};
pub use chunk::{ChunkKind, ChunkStream, ChunkUsage, DoneStatus, StreamChunk};
pub use error::{ChorusError, Result};
pub use usage::{BackendStatus, TokenUsage};

// Re-export budget types
pub use budget::{
    check, estimate_tokens, BudgetBreach, BudgetCheck, BudgetKind, BudgetLimits, BudgetScope,
    BudgetTracker, TokenMeter,
};

// Re-export backend types
pub use backend::{
    create_backend, provider_from_model, Backend, BackendError, BackendStream, ChatMessage,
    OllamaBackend, OpenAiBackend, Role, SharedBackend, StreamOptions, ToolSpec,
};

// Re-export config types
pub use config::{
    load_config, load_from_file, sample_config, AgentSettings, AgentTimeoutSettings,
    BackendSettings, ChorusConfig, ConfigError, SynthesisKind, TimeoutConfig, TimeoutOverrides,
};

// Re-export orchestration types
pub use orchestrator::{
    policy_for, AgentOutcome, AgentReport, FirstCompleted, LongestAnswer, Orchestrator,
    RunSummary, SynthesisPolicy, ORCHESTRATOR_SOURCE,
};

/// Get the crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
