//! Conversation and request types passed to backends

use serde::{Deserialize, Serialize};

/// Role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Chat message for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: Role,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Get the role as a string (for API compatibility)
    pub fn role_str(&self) -> &str {
        self.role.as_str()
    }
}

/// Opaque tool descriptor handed through to the provider.
///
/// The core never interprets tools; adapters translate them into their
/// provider's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSpec(pub serde_json::Value);

impl ToolSpec {
    /// A function tool in the common `{"type": "function", ...}` shape
    pub fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self(serde_json::json!({
            "type": "function",
            "name": name,
            "description": description,
            "parameters": parameters,
        }))
    }

    /// A provider built-in tool such as `web_search_preview`
    pub fn builtin(kind: &str) -> Self {
        Self(serde_json::json!({ "type": kind }))
    }

    /// The `type` field, if any
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(|t| t.as_str())
    }
}

/// Per-request generation options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Overrides the backend's configured model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}
