//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_stream::stream;
use async_trait::async_trait;
use chorus_core::{
    Backend, BackendError, BackendStream, ChatMessage, ChunkUsage, DoneStatus, SingleAgent,
    StreamChunk, StreamOptions, TimeoutConfig, ToolSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted backend action
#[derive(Clone)]
pub enum Step {
    /// Yield a chunk
    Chunk(StreamChunk),
    /// Wait on virtual time
    Sleep(Duration),
    /// Yield a backend failure
    Fail(BackendError),
    /// Never produce another item
    Hang,
    /// Panic inside the stream
    Panic,
}

pub fn text(s: &str) -> Step {
    Step::Chunk(StreamChunk::content(s, "scripted"))
}

pub fn done(input: u64, output: u64) -> Step {
    Step::Chunk(StreamChunk::done(DoneStatus::Completed, "scripted").with_usage(ChunkUsage::new(input, output)))
}

pub fn sleep(secs: u64) -> Step {
    Step::Sleep(Duration::from_secs(secs))
}

/// `count` content chunks, one every `every` seconds
pub fn drip(count: usize, every: u64, piece: &str) -> Vec<Step> {
    (0..count).flat_map(|_| [sleep(every), text(piece)]).collect()
}

/// Counts streams that were dropped before finishing their script
#[derive(Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct Unfinished {
    counter: DropCounter,
    finished: bool,
}

impl Drop for Unfinished {
    fn drop(&mut self) {
        if !self.finished {
            self.counter.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// In-memory backend replaying a fixed script
pub struct ScriptedBackend {
    steps: Vec<Step>,
    start_error: Option<BackendError>,
    dropped: DropCounter,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            start_error: None,
            dropped: DropCounter::default(),
        }
    }

    /// Backend whose request fails before any chunk
    pub fn failing(error: BackendError) -> Self {
        Self {
            steps: Vec::new(),
            start_error: Some(error),
            dropped: DropCounter::default(),
        }
    }

    pub fn with_drop_counter(mut self, counter: DropCounter) -> Self {
        self.dropped = counter;
        self
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<ToolSpec>>,
        _options: &StreamOptions,
    ) -> Result<BackendStream, BackendError> {
        if let Some(error) = self.start_error.clone() {
            return Err(error);
        }

        let steps = self.steps.clone();
        let counter = self.dropped.clone();
        Ok(Box::pin(stream! {
            let mut guard = Unfinished { counter, finished: false };
            for step in steps {
                match step {
                    Step::Chunk(chunk) => {
                        yield Ok(chunk);
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Fail(error) => {
                        yield Err(error);
                    }
                    Step::Hang => futures::future::pending::<()>().await,
                    Step::Panic => panic!("scripted backend panicked"),
                }
            }
            guard.finished = true;
        }))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, _model: &str) -> f64 {
        input_tokens as f64 * 0.00001 + output_tokens as f64 * 0.00002
    }
}

pub fn agent(id: &str, backend: ScriptedBackend) -> SingleAgent {
    SingleAgent::new(id, Arc::new(backend), "You are a helpful assistant.")
}

pub fn timeouts(agent_secs: u64, agent_tokens: u64, run_secs: u64, run_tokens: u64, fallback: bool) -> TimeoutConfig {
    TimeoutConfig {
        agent_timeout_seconds: agent_secs,
        agent_max_tokens: agent_tokens,
        orchestrator_timeout_seconds: run_secs,
        orchestrator_max_tokens: run_tokens,
        enable_timeout_fallback: fallback,
    }
}

/// Exactly one `done`, and it is last
pub fn assert_single_terminal_done(chunks: &[StreamChunk]) {
    let dones = chunks.iter().filter(|c| c.is_done()).count();
    assert_eq!(dones, 1, "expected exactly one done, got {}", dones);
    assert!(chunks.last().is_some_and(StreamChunk::is_done), "done must be last");
}
