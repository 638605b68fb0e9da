//! Error types for Chorus Core
//!
//! Provides a unified error type for orchestration runs. Per-agent backend
//! failures normally travel as `error` chunks; this type is what surfaces
//! when a run cannot be completed gracefully.

use crate::budget::{BudgetKind, BudgetScope};
use thiserror::Error;

/// Result type for Chorus Core operations
pub type Result<T> = std::result::Result<T, ChorusError>;

/// Unified error type for Chorus Core
#[derive(Error, Debug)]
pub enum ChorusError {
    /// A time or token ceiling was crossed and fallback was disabled
    #[error("{scope} {kind} limit exceeded")]
    BudgetExceeded {
        scope: BudgetScope,
        kind: BudgetKind,
    },

    /// A backend failed while serving an agent
    #[error("Backend failure in agent '{agent}': {message}")]
    Backend { agent: String, message: String },

    /// Invariant violation inside the merge loop
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ChorusError {
    /// Create a budget error
    pub fn budget(scope: BudgetScope, kind: BudgetKind) -> Self {
        ChorusError::BudgetExceeded { scope, kind }
    }

    /// Create a backend error attributed to an agent
    pub fn backend(agent: impl Into<String>, message: impl Into<String>) -> Self {
        ChorusError::Backend {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ChorusError::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ChorusError::Config(msg.into())
    }

    /// Whether the error should end the whole run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChorusError::Backend { .. })
    }
}

impl From<serde_json::Error> for ChorusError {
    fn from(err: serde_json::Error) -> Self {
        ChorusError::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for ChorusError {
    fn from(err: crate::config::ConfigError) -> Self {
        ChorusError::Config(err.to_string())
    }
}
