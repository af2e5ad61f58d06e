//! Token and cost accounting.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::pricing::ModelPricing;

/// Cumulative usage for a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub cache_read_input_tokens: i64,
    #[serde(default)]
    pub input_cost: f64,
    #[serde(default)]
    pub output_cost: f64,
    #[serde(default)]
    pub cache_read_cost: f64,
    /// Size of the latest exchange; replaced, never summed
    #[serde(default)]
    pub current_context_window: i64,
    #[serde(default)]
    pub max_context_window: i64,
}

impl Usage {
    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost + self.cache_read_cost
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens + self.cache_read_input_tokens
    }
}

/// Token counts reported by the provider for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    /// Prompt tokens, excluding cached ones
    pub input: i64,
    pub output: i64,
    pub cached_input: i64,
}

/// Shared, mutex-guarded usage accumulator.
///
/// Cloning yields another handle to the same counters; sub-agents hold a
/// clone of their parent's tracker so nested model calls roll up.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    inner: Arc<Mutex<Usage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Usage> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add one exchange's tokens and their cost.
    ///
    /// With `update_gauge` the context-window gauge is replaced by this
    /// exchange's size and the model's maximum.
    pub fn record(&self, tokens: TokenCounts, pricing: &ModelPricing, update_gauge: bool) {
        let mut usage = self.lock();
        usage.input_tokens += tokens.input;
        usage.output_tokens += tokens.output;
        usage.cache_read_input_tokens += tokens.cached_input;

        usage.input_cost += tokens.input as f64 * pricing.input;
        usage.output_cost += tokens.output as f64 * pricing.output;
        usage.cache_read_cost += tokens.cached_input as f64 * pricing.cached_input;

        if update_gauge {
            usage.current_context_window = tokens.input + tokens.cached_input + tokens.output;
            usage.max_context_window = pricing.context_window;
        }
    }

    pub fn snapshot(&self) -> Usage {
        *self.lock()
    }

    /// Zero the context-window gauge once the history has been compacted.
    pub fn reset_context_window(&self) {
        self.lock().current_context_window = 0;
    }

    /// Overwrite the counters, used when a conversation is loaded.
    pub fn replace(&self, usage: Usage) {
        *self.lock() = usage;
    }
}
