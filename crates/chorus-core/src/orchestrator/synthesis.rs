//! Answer synthesis
//!
//! Turns what the agents produced into the single answer carried on the
//! run's `done` chunk.

use super::run::AgentOutcome;
use crate::config::SynthesisKind;
use std::sync::Arc;

/// What one agent contributed by the end of a run
#[derive(Debug, Clone, Copy)]
pub struct AgentAnswer<'a> {
    pub agent: &'a str,
    pub content: &'a str,
    pub outcome: AgentOutcome,
    /// Position among agents that finished, starting at 0
    pub finish_order: Option<usize>,
}

impl AgentAnswer<'_> {
    fn is_complete(&self) -> bool {
        self.outcome == AgentOutcome::Completed && !self.content.trim().is_empty()
    }

    fn is_partial(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Strategy for choosing the run's answer
pub trait SynthesisPolicy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Pick an answer. Completed answers are preferred; partial content is
    /// used only when nothing completed. `None` when nothing is usable.
    fn synthesize(&self, answers: &[AgentAnswer<'_>]) -> Option<String>;
}

/// Answer of the agent that finished first
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstCompleted;

impl SynthesisPolicy for FirstCompleted {
    fn name(&self) -> &'static str {
        "first_completed"
    }

    fn synthesize(&self, answers: &[AgentAnswer<'_>]) -> Option<String> {
        answers
            .iter()
            .filter(|a| a.is_complete())
            .min_by_key(|a| a.finish_order.unwrap_or(usize::MAX))
            .or_else(|| longest(answers.iter().filter(|a| a.is_partial())))
            .map(|a| a.content.to_string())
    }
}

/// Longest answer among agents that finished
#[derive(Debug, Default, Clone, Copy)]
pub struct LongestAnswer;

impl SynthesisPolicy for LongestAnswer {
    fn name(&self) -> &'static str {
        "longest"
    }

    fn synthesize(&self, answers: &[AgentAnswer<'_>]) -> Option<String> {
        longest(answers.iter().filter(|a| a.is_complete()))
            .or_else(|| longest(answers.iter().filter(|a| a.is_partial())))
            .map(|a| a.content.to_string())
    }
}

// Ties go to the earliest agent
fn longest<'a, 'b>(answers: impl Iterator<Item = &'b AgentAnswer<'a>>) -> Option<&'b AgentAnswer<'a>> {
    answers.fold(None, |best: Option<&'b AgentAnswer<'a>>, a| match best {
        Some(b) if b.content.len() >= a.content.len() => Some(b),
        _ => Some(a),
    })
}

/// Policy selected by configuration
pub fn policy_for(kind: SynthesisKind) -> Arc<dyn SynthesisPolicy> {
    match kind {
        SynthesisKind::FirstCompleted => Arc::new(FirstCompleted),
        SynthesisKind::Longest => Arc::new(LongestAnswer),
    }
}
