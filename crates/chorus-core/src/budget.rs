//! Budget tracking
//!
//! A `BudgetTracker` answers "is this scope still within its time and token
//! ceilings?" for one agent or for a whole run. Checks are cheap and meant to
//! be called after every chunk.

use crate::chunk::{ChunkKind, ChunkUsage, StreamChunk};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Characters per token used for incremental estimates
const CHARS_PER_TOKEN: u64 = 4;

/// Stand-in deadline for time ceilings too large to represent as an instant
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Rough token count for a piece of text
pub fn estimate_tokens(text: &str) -> u64 {
    text.len() as u64 / CHARS_PER_TOKEN
}

/// Who a budget applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetScope {
    Agent,
    Orchestrator,
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetScope::Agent => f.write_str("agent"),
            BudgetScope::Orchestrator => f.write_str("orchestrator"),
        }
    }
}

/// Which ceiling was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetKind {
    Time,
    Tokens,
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetKind::Time => f.write_str("time"),
            BudgetKind::Tokens => f.write_str("token"),
        }
    }
}

/// A crossed ceiling, attributed to a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetBreach {
    pub scope: BudgetScope,
    pub kind: BudgetKind,
}

impl BudgetBreach {
    pub fn new(scope: BudgetScope, kind: BudgetKind) -> Self {
        Self { scope, kind }
    }
}

impl fmt::Display for BudgetBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} limit exceeded", self.scope, self.kind)
    }
}

/// Ceilings for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub timeout: Duration,
    pub max_tokens: u64,
}

impl BudgetLimits {
    pub fn new(timeout: Duration, max_tokens: u64) -> Self {
        Self {
            timeout,
            max_tokens,
        }
    }
}

/// Outcome of a budget check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetCheck {
    Ok,
    Exceeded(BudgetKind),
}

impl BudgetCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, BudgetCheck::Ok)
    }
}

/// Compare consumption against limits. Time wins when both are crossed.
pub fn check(elapsed: Duration, tokens_consumed: u64, limits: &BudgetLimits) -> BudgetCheck {
    if elapsed > limits.timeout {
        BudgetCheck::Exceeded(BudgetKind::Time)
    } else if tokens_consumed > limits.max_tokens {
        BudgetCheck::Exceeded(BudgetKind::Tokens)
    } else {
        BudgetCheck::Ok
    }
}

/// Running token count for one scope.
///
/// Text is estimated as it streams; reported usage settles the pending
/// estimate once a backend finishes a response.
#[derive(Debug, Clone, Default)]
pub struct TokenMeter {
    settled: u64,
    pending_chars: u64,
}

impl TokenMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for streamed text not yet covered by reported usage
    pub fn observe_text(&mut self, text: &str) {
        self.pending_chars += text.len() as u64;
    }

    /// Replace the pending estimate with authoritative usage
    pub fn settle(&mut self, usage: &ChunkUsage) {
        self.settled += usage.total();
        self.pending_chars = 0;
    }

    /// Add a delta reported by someone else (used at orchestrator scope)
    pub fn add(&mut self, tokens: u64) {
        self.settled += tokens;
    }

    pub fn tokens(&self) -> u64 {
        self.settled + self.pending_chars / CHARS_PER_TOKEN
    }
}

/// Budget state for one scope
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    scope: BudgetScope,
    limits: BudgetLimits,
    started: Instant,
    meter: TokenMeter,
}

impl BudgetTracker {
    /// Start tracking now
    pub fn start(scope: BudgetScope, limits: BudgetLimits) -> Self {
        Self {
            scope,
            limits,
            started: Instant::now(),
            meter: TokenMeter::new(),
        }
    }

    pub fn scope(&self) -> BudgetScope {
        self.scope
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Instant at which the time ceiling is crossed
    pub fn deadline(&self) -> Instant {
        self.started
            .checked_add(self.limits.timeout)
            .unwrap_or_else(|| self.started + FAR_FUTURE)
    }

    pub fn tokens(&self) -> u64 {
        self.meter.tokens()
    }

    pub fn meter_mut(&mut self) -> &mut TokenMeter {
        &mut self.meter
    }

    /// Fold a chunk's contribution into the meter
    pub fn record(&mut self, chunk: &StreamChunk) {
        if let Some(usage) = chunk.usage.as_ref() {
            self.meter.settle(usage);
        } else if matches!(chunk.kind, ChunkKind::Content | ChunkKind::ToolCalls) {
            self.meter.observe_text(chunk.text());
        }
    }

    /// Check the scope against its limits
    pub fn check(&self) -> Result<(), BudgetBreach> {
        match check(self.elapsed(), self.tokens(), &self.limits) {
            BudgetCheck::Ok => Ok(()),
            BudgetCheck::Exceeded(kind) => Err(BudgetBreach::new(self.scope, kind)),
        }
    }

    /// Human-readable description of a breach for this scope.
    ///
    /// Every cut-off reads "time limit exceeded" so consumers can match one
    /// phrase; `BudgetBreach::kind` says which ceiling it was.
    pub fn describe(&self, breach: BudgetBreach, who: &str) -> String {
        match breach.kind {
            BudgetKind::Time => format!(
                "{} '{}' time limit exceeded after {:.1}s (limit {}s)",
                self.scope,
                who,
                self.elapsed().as_secs_f64(),
                self.limits.timeout.as_secs()
            ),
            BudgetKind::Tokens => format!(
                "{} '{}' time limit exceeded: token budget {}/{}",
                self.scope,
                who,
                self.tokens(),
                self.limits.max_tokens
            ),
        }
    }
}
