//! Run state
//!
//! Everything the merge loop knows about a run lives here: the lifecycle
//! phase, one ledger entry per agent and the orchestrator-scope budget.
//! The merge loop is the only writer.

use super::synthesis::{AgentAnswer, SynthesisPolicy};
use crate::budget::{BudgetBreach, BudgetKind, BudgetLimits, BudgetScope, BudgetTracker, TokenMeter};
use crate::chunk::{ChunkKind, DoneStatus, StreamChunk};
use crate::error::{ChorusError, Result};
use serde::Serialize;
use std::fmt;

/// Source tag for chunks produced by the orchestrator itself
pub const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Running,
    Completed,
    TimedOut,
    Failed,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::TimedOut => "timed_out",
            RunPhase::Failed => "failed",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How one agent's participation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    /// Still streaming
    Active,
    /// Finished normally
    Completed,
    /// Cut off by its own budget, partial content kept
    Degraded,
    /// Backend failure
    Failed,
    /// Cut off by its own budget with fallback disabled
    Aborted,
    /// Stopped by the orchestrator before it finished
    Cancelled,
}

impl AgentOutcome {
    fn from_done(status: DoneStatus) -> Self {
        match status {
            DoneStatus::Completed => AgentOutcome::Completed,
            DoneStatus::Degraded | DoneStatus::TimedOut => AgentOutcome::Degraded,
            DoneStatus::Aborted => AgentOutcome::Aborted,
            DoneStatus::Cancelled => AgentOutcome::Cancelled,
            DoneStatus::Failed => AgentOutcome::Failed,
        }
    }
}

/// Messages from an agent's forwarding task
#[derive(Debug)]
pub enum AgentSignal {
    Chunk(StreamChunk),
    /// The agent's stream has no more items
    Ended,
}

/// What the merge loop should do with an agent chunk
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Pass it to the caller
    Forward,
    /// Keep it internal
    Swallow,
    /// End the run as a hard failure
    Abort(BudgetBreach),
}

#[derive(Debug)]
struct AgentLedger {
    id: String,
    outcome: AgentOutcome,
    content: String,
    meter: TokenMeter,
    finish_order: Option<usize>,
    error: Option<String>,
    breach: Option<BudgetBreach>,
}

impl AgentLedger {
    fn new(id: String) -> Self {
        Self {
            id,
            outcome: AgentOutcome::Active,
            content: String::new(),
            meter: TokenMeter::new(),
            finish_order: None,
            error: None,
            breach: None,
        }
    }
}

/// Per-agent line of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub id: String,
    pub outcome: AgentOutcome,
    pub content: String,
    pub tokens: u64,
    pub error: Option<String>,
}

/// Mutable state of a run, owned by the merge loop
pub struct RunState {
    phase: RunPhase,
    agents: Vec<AgentLedger>,
    budget: BudgetTracker,
    finished: usize,
}

impl RunState {
    pub fn new(agent_ids: Vec<String>, limits: BudgetLimits) -> Self {
        Self {
            phase: RunPhase::Init,
            agents: agent_ids.into_iter().map(AgentLedger::new).collect(),
            budget: BudgetTracker::start(BudgetScope::Orchestrator, limits),
            finished: 0,
        }
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// INIT -> RUNNING
    pub fn begin(&mut self) -> Result<()> {
        if self.phase != RunPhase::Init {
            return Err(ChorusError::internal(format!("run cannot start from phase {}", self.phase)));
        }
        if self.agents.is_empty() {
            return Err(ChorusError::config("no agents configured"));
        }
        self.phase = RunPhase::Running;
        Ok(())
    }

    /// Fold one agent chunk into the ledger
    pub fn observe(&mut self, index: usize, chunk: &StreamChunk) -> Result<Disposition> {
        if self.phase != RunPhase::Running {
            return Err(ChorusError::internal(format!("chunk received in phase {}", self.phase)));
        }
        let finished = self.finished;
        let agent = self
            .agents
            .get_mut(index)
            .ok_or_else(|| ChorusError::internal(format!("chunk from unknown agent #{}", index)))?;

        if agent.outcome != AgentOutcome::Active {
            tracing::warn!(agent = %agent.id, kind = chunk.kind.as_str(), "chunk after agent finished, dropped");
            return Ok(Disposition::Swallow);
        }

        let before = agent.meter.tokens();
        if let Some(usage) = chunk.usage.as_ref() {
            agent.meter.settle(usage);
        } else if matches!(chunk.kind, ChunkKind::Content | ChunkKind::ToolCalls) {
            agent.meter.observe_text(chunk.text());
        }
        let delta = agent.meter.tokens().saturating_sub(before);
        self.budget.meter_mut().add(delta);

        let disposition = match chunk.kind {
            ChunkKind::Content => {
                agent.content.push_str(chunk.text());
                Disposition::Forward
            }
            ChunkKind::ToolCalls => Disposition::Forward,
            ChunkKind::Error => {
                agent.error = chunk.error.clone();
                match chunk.breach {
                    // Budget notices are followed by the agent's done
                    Some(breach) => {
                        agent.breach = Some(breach);
                        Disposition::Forward
                    }
                    None => {
                        agent.outcome = AgentOutcome::Failed;
                        agent.finish_order = Some(finished);
                        self.finished += 1;
                        Disposition::Forward
                    }
                }
            }
            ChunkKind::Done => {
                let status = chunk.status.unwrap_or(DoneStatus::Completed);
                agent.outcome = AgentOutcome::from_done(status);
                agent.finish_order = Some(finished);
                self.finished += 1;
                tracing::debug!(agent = %agent.id, %status, "agent done");
                match agent.outcome {
                    AgentOutcome::Aborted => Disposition::Abort(
                        agent
                            .breach
                            .unwrap_or_else(|| BudgetBreach::new(BudgetScope::Agent, BudgetKind::Time)),
                    ),
                    _ => Disposition::Swallow,
                }
            }
        };

        Ok(disposition)
    }

    /// Mark an agent whose stream ended; one that never sent `done` or an error failed
    pub fn agent_ended(&mut self, index: usize) {
        if let Some(agent) = self.agents.get_mut(index) {
            if agent.outcome == AgentOutcome::Active {
                tracing::warn!(agent = %agent.id, "agent stream ended without done");
                agent.outcome = AgentOutcome::Failed;
                agent.finish_order = Some(self.finished);
                self.finished += 1;
            }
        }
    }

    pub fn all_finished(&self) -> bool {
        self.finished >= self.agents.len()
    }

    /// Check the run-level ceilings
    pub fn check_budget(&self) -> std::result::Result<(), BudgetBreach> {
        self.budget.check()
    }

    /// Mark still-active agents as stopped by the orchestrator
    pub fn cancel_active(&mut self) {
        for agent in self.agents.iter_mut().filter(|a| a.outcome == AgentOutcome::Active) {
            agent.outcome = AgentOutcome::Cancelled;
        }
    }

    /// Mark agents whose task vanished without a terminal chunk as failed,
    /// returning their ids
    pub fn fail_active(&mut self) -> Vec<String> {
        let mut vanished = Vec::new();
        for agent in self.agents.iter_mut().filter(|a| a.outcome == AgentOutcome::Active) {
            tracing::warn!(agent = %agent.id, "agent task ended without a result");
            agent.outcome = AgentOutcome::Failed;
            agent.finish_order = Some(self.finished);
            agent.error = Some("agent stopped unexpectedly".to_string());
            self.finished += 1;
            vanished.push(agent.id.clone());
        }
        vanished
    }

    /// Status for a run whose agents all finished on their own.
    ///
    /// An agent cut off by its own budget with fallback on makes the run
    /// `degraded` even if it produced nothing; only runs where every agent
    /// failed outright are `failed`.
    pub fn settled_status(&self) -> DoneStatus {
        if self.agents.iter().any(|a| a.outcome == AgentOutcome::Completed) {
            DoneStatus::Completed
        } else if self
            .agents
            .iter()
            .any(|a| a.outcome == AgentOutcome::Degraded || !a.content.trim().is_empty())
        {
            DoneStatus::Degraded
        } else {
            DoneStatus::Failed
        }
    }

    pub fn synthesize(&self, policy: &dyn SynthesisPolicy) -> Option<String> {
        let answers: Vec<AgentAnswer<'_>> = self
            .agents
            .iter()
            .map(|a| AgentAnswer {
                agent: &a.id,
                content: &a.content,
                outcome: a.outcome,
                finish_order: a.finish_order,
            })
            .collect();
        policy.synthesize(&answers)
    }

    /// Move to the terminal phase matching `status` and build the run's
    /// `done` chunk. Fails if a `done` was already produced.
    pub fn finish(&mut self, status: DoneStatus, answer: Option<String>) -> Result<StreamChunk> {
        let terminal = match (self.phase, status) {
            (RunPhase::Done, _) => {
                return Err(ChorusError::internal("run already finished"));
            }
            (_, DoneStatus::Completed | DoneStatus::Degraded) => RunPhase::Completed,
            (_, DoneStatus::TimedOut) => RunPhase::TimedOut,
            _ => RunPhase::Failed,
        };
        tracing::debug!(from = %self.phase, to = %terminal, "run phase");
        self.phase = RunPhase::Done;

        let chunk = StreamChunk::done(status, ORCHESTRATOR_SOURCE);
        Ok(match answer {
            Some(answer) if status.has_answer() => chunk.with_content(answer),
            _ => chunk,
        })
    }

    /// Describe a run-level breach
    pub fn describe(&self, breach: BudgetBreach) -> String {
        self.budget.describe(breach, "run")
    }

    pub fn reports(&self) -> Vec<AgentReport> {
        self.agents
            .iter()
            .map(|a| AgentReport {
                id: a.id.clone(),
                outcome: a.outcome,
                content: a.content.clone(),
                tokens: a.meter.tokens(),
                error: a.error.clone(),
            })
            .collect()
    }
}
