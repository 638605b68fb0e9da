//! Backend capability
//!
//! A backend wraps one language-model provider behind a single streaming
//! operation. Everything provider-specific (wire format, pricing, auth)
//! lives behind this trait; the agent and orchestrator only see
//! `StreamChunk`s.
//!
//! Supported providers:
//! - OpenAI (Responses API)
//! - Ollama (local inference)

mod error;
mod message;
mod ollama;
mod openai;
mod pricing;
mod registry;

pub use error::BackendError;
pub use message::{ChatMessage, Role, StreamOptions, ToolSpec};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use pricing::{openai_cost, ModelRates};
pub use registry::{create_backend, provider_from_model};

use crate::chunk::StreamChunk;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffered chunks between a blocking HTTP worker and its stream
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// A boxed stream of chunks or backend failures
pub type BackendStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, BackendError>> + Send>>;

/// Provider capability consumed by agents
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stream a response for the conversation.
    ///
    /// Returning `Err` means the request could not be started. Failures after
    /// the first chunk are yielded as `Err` items. A well-behaved backend ends
    /// a successful response with a `done` chunk carrying usage.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
        options: &StreamOptions,
    ) -> Result<BackendStream, BackendError>;

    /// Provider identifier (e.g. "openai", "ollama")
    fn provider_name(&self) -> &str;

    /// Model used when the request does not override it
    fn model(&self) -> &str;

    /// Estimated cost in USD for the given usage
    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64;
}

/// Shared handle to a backend
pub type SharedBackend = Arc<dyn Backend>;

/// Adapt a worker channel into a backend stream
pub(crate) fn channel_stream(
    mut rx: mpsc::Receiver<Result<StreamChunk, BackendError>>,
) -> BackendStream {
    Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    })
}
