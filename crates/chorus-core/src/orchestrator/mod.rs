//! Orchestrator
//!
//! Runs every agent concurrently against the same conversation, enforces the
//! run-level budget over their combined output and merges their streams into
//! one. The merged stream always ends with exactly one `done` chunk whose
//! `source` is `orchestrator`.
//!
//! Each agent stream is driven by its own task that forwards chunks over a
//! channel; a single merge loop owns all run state and is the only place the
//! run-level budget is updated.

mod run;
mod synthesis;

pub use run::{AgentOutcome, AgentReport, ORCHESTRATOR_SOURCE};
pub use synthesis::{policy_for, AgentAnswer, FirstCompleted, LongestAnswer, SynthesisPolicy};

use crate::agent::{AgentConfig, AgentStatus, SingleAgent};
use crate::backend::{create_backend, ChatMessage, StreamOptions, ToolSpec, CHANNEL_CAPACITY};
use crate::budget::{BudgetBreach, BudgetKind, BudgetScope};
use crate::chunk::{ChunkStream, DoneStatus, StreamChunk};
use crate::config::{ChorusConfig, TimeoutConfig};
use crate::error::{ChorusError, Result};
use async_stream::stream;
use futures::StreamExt;
use run::{AgentSignal, Disposition, RunState};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Result of draining a run with [`Orchestrator::run`]
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Status carried on the run's `done`
    pub status: DoneStatus,
    /// Synthesized answer, if any
    pub answer: Option<String>,
    /// Messages of every `error` chunk, in order
    pub errors: Vec<String>,
    /// How each agent finished
    pub agents: Vec<AgentReport>,
    /// Every chunk of the merged stream, `done` last
    pub chunks: Vec<StreamChunk>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Concatenated content relayed from one agent
    pub fn content_from(&self, agent: &str) -> String {
        self.chunks
            .iter()
            .filter(|c| c.is_content() && c.source() == agent)
            .map(StreamChunk::text)
            .collect()
    }
}

/// Sent by the merge loop once the run is over
struct RunReport {
    agents: Vec<AgentReport>,
    failure: Option<ChorusError>,
}

enum Step {
    Cancelled,
    Deadline,
    Signal(Option<(usize, AgentSignal)>),
}

enum RunEnd {
    /// Every agent finished on its own
    Settled,
    /// Run-level ceiling crossed
    Breach(BudgetBreach),
    /// An agent crossed its ceiling with fallback disabled
    AgentAborted(BudgetBreach),
    Cancelled,
    Internal(ChorusError),
}

/// Coordinates a set of agents under one budget
pub struct Orchestrator {
    agents: Vec<SingleAgent>,
    config: TimeoutConfig,
    policy: Arc<dyn SynthesisPolicy>,
}

impl Orchestrator {
    /// Create an orchestrator using the default synthesis policy
    pub fn new(agents: Vec<SingleAgent>, config: TimeoutConfig) -> Self {
        Self {
            agents,
            config,
            policy: Arc::new(FirstCompleted),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SynthesisPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Build agents and backends from configuration
    pub fn from_config(config: &ChorusConfig) -> Result<Self> {
        config.validate().map_err(ChorusError::Config)?;

        let mut agents = Vec::with_capacity(config.agents.len());
        for settings in &config.agents {
            let backend = create_backend(&settings.backend)
                .map_err(|e| ChorusError::config(format!("agent '{}': {}", settings.id, e)))?;
            let options = StreamOptions {
                model: None,
                temperature: settings.backend.temperature,
                max_tokens: settings.backend.max_tokens,
            };
            let mut agent = AgentConfig::new(&settings.id, backend, &settings.system_message).with_options(options);
            if let Some(timeouts) = settings.effective_timeouts(&config.timeout_settings) {
                agent = agent.with_timeout_config(timeouts);
            }
            agents.push(SingleAgent::from_config(agent));
        }

        Ok(Self::new(agents, config.timeout_settings).with_policy(policy_for(config.orchestrator.synthesis)))
    }

    pub fn agents(&self) -> &[SingleAgent] {
        &self.agents
    }

    pub fn timeout_config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn policy(&self) -> &dyn SynthesisPolicy {
        self.policy.as_ref()
    }

    /// Usage snapshot for every agent
    pub fn agent_statuses(&self) -> Vec<AgentStatus> {
        self.agents.iter().map(SingleAgent::status).collect()
    }

    /// Stream a run over the conversation
    pub fn chat(&self, messages: Vec<ChatMessage>, tools: Option<Vec<ToolSpec>>) -> ChunkStream {
        self.merged(messages, tools, CancellationToken::new(), None)
    }

    /// Stream a run for a single user question
    pub fn chat_simple(&self, question: &str) -> ChunkStream {
        self.chat(vec![ChatMessage::user(question)], None)
    }

    /// Stream a run the caller can abort by cancelling `cancel`. An aborted
    /// run ends with `done` status `cancelled`.
    pub fn chat_with_cancellation(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
        cancel: CancellationToken,
    ) -> ChunkStream {
        self.merged(messages, tools, cancel, None)
    }

    /// Drain a run into a summary.
    ///
    /// Fails when the run ended in a hard budget failure (fallback disabled)
    /// or an internal error. A run whose agents all failed is not an error;
    /// its summary carries status `failed`.
    pub async fn run(&self, messages: Vec<ChatMessage>, tools: Option<Vec<ToolSpec>>) -> Result<RunSummary> {
        if self.agents.is_empty() {
            return Err(ChorusError::config("no agents configured"));
        }

        let started = Instant::now();
        let (report_tx, report_rx) = oneshot::channel();
        let mut stream = self.merged(messages, tools, CancellationToken::new(), Some(report_tx));

        let mut chunks = Vec::new();
        let mut errors = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let Some(message) = chunk.error.as_ref() {
                errors.push(message.clone());
            }
            chunks.push(chunk);
        }

        let report = report_rx
            .await
            .map_err(|_| ChorusError::internal("run ended without a report"))?;
        if let Some(failure) = report.failure {
            return Err(failure);
        }

        let done = chunks
            .last()
            .filter(|c| c.is_done())
            .ok_or_else(|| ChorusError::internal("run ended without done"))?;

        Ok(RunSummary {
            status: done.status.unwrap_or(DoneStatus::Failed),
            answer: done.content.clone(),
            errors,
            agents: report.agents,
            elapsed: started.elapsed(),
            chunks,
        })
    }

    fn merged(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
        cancel: CancellationToken,
        report: Option<oneshot::Sender<RunReport>>,
    ) -> ChunkStream {
        let config = self.config;
        let policy = self.policy.clone();
        let ids: Vec<String> = self.agents.iter().map(|a| a.id().to_string()).collect();
        // Agent streams are lazy; nothing runs until the merged stream is polled
        let streams: Vec<ChunkStream> = self
            .agents
            .iter()
            .map(|a| a.respond_within(messages.clone(), tools.clone(), &config))
            .collect();

        Box::pin(stream! {
            let mut run = RunState::new(ids, config.orchestrator_limits());
            if let Err(e) = run.begin() {
                tracing::error!(error = %e, "run could not start");
                yield StreamChunk::error(e.to_string(), ORCHESTRATOR_SOURCE);
                if let Some(report) = report {
                    let _ = report.send(RunReport { agents: Vec::new(), failure: Some(e) });
                }
                yield StreamChunk::done(DoneStatus::Failed, ORCHESTRATOR_SOURCE);
                return;
            }
            tracing::info!(
                agents = streams.len(),
                timeout_s = config.orchestrator_timeout_seconds,
                max_tokens = config.orchestrator_max_tokens,
                policy = policy.name(),
                "run started"
            );

            let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
            let agent_cancel = cancel.child_token();
            let mut tasks = JoinSet::new();
            for (index, agent_stream) in streams.into_iter().enumerate() {
                tasks.spawn(forward(index, agent_stream, tx.clone(), agent_cancel.clone()));
            }
            drop(tx);

            let deadline = run.budget().deadline();
            let end = loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    _ = sleep_until(deadline) => Step::Deadline,
                    signal = rx.recv() => Step::Signal(signal),
                };

                match step {
                    Step::Cancelled => break RunEnd::Cancelled,
                    Step::Deadline => {
                        break RunEnd::Breach(BudgetBreach::new(BudgetScope::Orchestrator, BudgetKind::Time));
                    }
                    Step::Signal(None) => break RunEnd::Settled,
                    Step::Signal(Some((index, AgentSignal::Ended))) => run.agent_ended(index),
                    Step::Signal(Some((index, AgentSignal::Chunk(chunk)))) => {
                        match run.observe(index, &chunk) {
                            Err(e) => break RunEnd::Internal(e),
                            Ok(Disposition::Abort(breach)) => break RunEnd::AgentAborted(breach),
                            Ok(Disposition::Swallow) => {}
                            Ok(Disposition::Forward) => {
                                tracing::trace!(agent = chunk.source(), kind = chunk.kind.as_str(), "relay");
                                yield chunk;
                            }
                        }
                        if let Err(breach) = run.check_budget() {
                            break RunEnd::Breach(breach);
                        }
                    }
                }

                if run.all_finished() {
                    break RunEnd::Settled;
                }
            };

            // Stop every agent still streaming; dropping a task drops its backend stream
            agent_cancel.cancel();
            tasks.abort_all();

            let mut failure = None;
            let (status, answer) = match end {
                RunEnd::Settled => {
                    for id in run.fail_active() {
                        yield StreamChunk::error("agent stopped unexpectedly", id.as_str());
                    }
                    (run.settled_status(), run.synthesize(policy.as_ref()))
                }
                RunEnd::Breach(breach) => {
                    run.cancel_active();
                    let message = run.describe(breach);
                    tracing::warn!(%breach, fallback = config.enable_timeout_fallback, "{}", message);
                    yield StreamChunk::budget_error(breach, message, ORCHESTRATOR_SOURCE);
                    if config.enable_timeout_fallback {
                        let status = match breach.kind {
                            BudgetKind::Time => DoneStatus::TimedOut,
                            BudgetKind::Tokens => DoneStatus::Degraded,
                        };
                        (status, run.synthesize(policy.as_ref()))
                    } else {
                        failure = Some(ChorusError::budget(breach.scope, breach.kind));
                        (DoneStatus::Aborted, None)
                    }
                }
                RunEnd::AgentAborted(breach) => {
                    run.cancel_active();
                    tracing::warn!(%breach, "agent budget exceeded with fallback disabled, aborting run");
                    failure = Some(ChorusError::budget(breach.scope, breach.kind));
                    (DoneStatus::Aborted, None)
                }
                RunEnd::Cancelled => {
                    run.cancel_active();
                    tracing::info!("run cancelled by caller");
                    (DoneStatus::Cancelled, None)
                }
                RunEnd::Internal(e) => {
                    run.cancel_active();
                    tracing::error!(error = %e, "run failed");
                    yield StreamChunk::error(e.to_string(), ORCHESTRATOR_SOURCE);
                    failure = Some(e);
                    (DoneStatus::Failed, None)
                }
            };

            let elapsed = run.budget().elapsed();
            let tokens = run.budget().tokens();
            let agents = run.reports();
            match run.finish(status, answer) {
                Ok(done) => {
                    tracing::info!(%status, elapsed_ms = elapsed.as_millis() as u64, tokens, "run finished");
                    if let Some(report) = report {
                        let _ = report.send(RunReport { agents, failure });
                    }
                    yield done;
                }
                Err(e) => tracing::error!(error = %e, "terminal chunk not emitted"),
            }
        })
    }
}

/// Drive one agent stream, forwarding its chunks to the merge loop
async fn forward(
    index: usize,
    mut agent_stream: ChunkStream,
    tx: mpsc::Sender<(usize, AgentSignal)>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = agent_stream.next() => next,
        };

        match next {
            Some(chunk) => {
                if tx.send((index, AgentSignal::Chunk(chunk))).await.is_err() {
                    return;
                }
            }
            None => {
                let _ = tx.send((index, AgentSignal::Ended)).await;
                return;
            }
        }
    }
}
