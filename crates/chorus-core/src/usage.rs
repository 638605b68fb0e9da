//! Token usage and cost accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accumulated token usage and estimated cost.
///
/// Totals only ever grow; `add_usage` is the single mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    input_tokens: u64,
    output_tokens: u64,
    estimated_cost: f64,
    model: Option<String>,
    provider: Option<String>,
    created_at: DateTime<Utc>,
}

impl Default for TokenUsage {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl TokenUsage {
    /// Create an empty accumulator
    pub fn new(model: Option<String>, provider: Option<String>) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost: 0.0,
            model,
            provider,
            created_at: Utc::now(),
        }
    }

    /// Create an accumulator labelled with a provider and model
    pub fn for_backend(provider: &str, model: &str) -> Self {
        Self::new(Some(model.to_string()), Some(provider.to_string()))
    }

    /// Add usage to the current totals. Negative costs are ignored.
    pub fn add_usage(&mut self, input_tokens: u64, output_tokens: u64, cost: f64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        if cost.is_finite() && cost > 0.0 {
            self.estimated_cost += cost;
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start over with a fresh accumulator carrying the same labels
    pub fn reset(&mut self) {
        *self = Self::new(self.model.take(), self.provider.take());
    }
}

/// Snapshot of a backend's identity and accumulated usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub provider: String,
    pub model: String,
    pub token_usage: TokenUsage,
}
