//! Stream chunk protocol
//!
//! `StreamChunk` is the unit every backend, agent and the orchestrator speak.
//! A chunk is moved from producer to consumer; nothing mutates it after it
//! has been emitted.

use crate::budget::BudgetBreach;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

/// A boxed, sendable sequence of chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Chunk discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Text delta
    Content,
    /// Tool call payload (opaque to the core)
    ToolCalls,
    /// Failure or budget notice
    Error,
    /// Terminal signal
    Done,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Content => "content",
            ChunkKind::ToolCalls => "tool_calls",
            ChunkKind::Error => "error",
            ChunkKind::Done => "done",
        }
    }
}

/// Terminal state carried by a `done` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneStatus {
    /// Finished normally
    Completed,
    /// Finished with a best-effort answer after a budget cut or partial failure
    Degraded,
    /// Orchestrator budget cut the run short, fallback answer produced
    TimedOut,
    /// Nothing usable was produced
    Failed,
    /// A budget was crossed with fallback disabled
    Aborted,
    /// The caller cancelled the run
    Cancelled,
}

impl DoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoneStatus::Completed => "completed",
            DoneStatus::Degraded => "degraded",
            DoneStatus::TimedOut => "timed_out",
            DoneStatus::Failed => "failed",
            DoneStatus::Aborted => "aborted",
            DoneStatus::Cancelled => "cancelled",
        }
    }

    /// True for statuses that still deliver an answer to the caller
    pub fn has_answer(&self) -> bool {
        matches!(
            self,
            DoneStatus::Completed | DoneStatus::Degraded | DoneStatus::TimedOut
        )
    }
}

impl fmt::Display for DoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts reported by a backend alongside a `done` chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ChunkUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One unit of streamed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Discriminant
    #[serde(rename = "type")]
    pub kind: ChunkKind,

    /// Text, present for `content` and `tool_calls`; synthesized answer on a run's `done`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Message, present for `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Originating agent or provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Terminal state, present for `done`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DoneStatus>,

    /// Usage reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChunkUsage>,

    /// Set on `error` chunks produced by budget enforcement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breach: Option<BudgetBreach>,
}

impl StreamChunk {
    fn bare(kind: ChunkKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            content: None,
            error: None,
            source: Some(source.into()),
            status: None,
            usage: None,
            breach: None,
        }
    }

    /// Create a content chunk
    pub fn content(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::bare(ChunkKind::Content, source)
        }
    }

    /// Create a tool call chunk
    pub fn tool_calls(payload: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: Some(payload.into()),
            ..Self::bare(ChunkKind::ToolCalls, source)
        }
    }

    /// Create an error chunk
    pub fn error(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(ChunkKind::Error, source)
        }
    }

    /// Create a budget notice for a crossed ceiling
    pub fn budget_error(breach: BudgetBreach, message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            breach: Some(breach),
            ..Self::error(message, source)
        }
    }

    /// Create a terminal chunk
    pub fn done(status: DoneStatus, source: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::bare(ChunkKind::Done, source)
        }
    }

    /// Attach usage
    pub fn with_usage(mut self, usage: ChunkUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach text (used for the synthesized answer on a run's `done`)
    pub fn with_content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    /// Re-tag with a new source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_content(&self) -> bool {
        self.kind == ChunkKind::Content
    }

    pub fn is_error(&self) -> bool {
        self.kind == ChunkKind::Error
    }

    pub fn is_done(&self) -> bool {
        self.kind == ChunkKind::Done
    }

    /// Text of the chunk, empty when absent
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Source of the chunk, empty when absent
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or("")
    }
}
