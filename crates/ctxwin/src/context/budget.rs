//! Token budgets, context-management settings, and usage snapshots.
//!
//! [`TokenBudget`] describes the model's window and the headroom kept free
//! of it; [`ContextSettings`] holds the knobs that decide when to condense
//! and how much recent history is always kept intact. Both are plain serde
//! structs so callers can persist them in whatever settings store they use;
//! [`ContextConfig`] bundles them for loading from a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Message;
use crate::context::tokens::TokenEstimator;
use crate::error::TranscriptError;

/// Default context window size in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Default multiplier applied to raw estimates before budget comparisons.
pub const DEFAULT_FUDGE_FACTOR: f64 = 1.05;

/// Default headroom (tokens) left unused by the pruner.
pub const DEFAULT_SAFETY_MARGIN_TOKENS: usize = 1000;

/// Default usage percentage at which condensation is attempted.
pub const DEFAULT_CONDENSE_THRESHOLD_PERCENT: u32 = 70;

/// Default size of the always-intact trailing window.
pub const DEFAULT_KEEP_RECENT: usize = 8;

/// Default upper bound on one summarization request.
pub const DEFAULT_CONDENSE_TIMEOUT_MS: u64 = 120_000;

/// Token budget for a single model call.
///
/// # Example
///
/// ```ignore
/// let budget = TokenBudget::default()
///     .with_max_tokens(128_000)
///     .with_safety_margin(2_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudget {
    /// Model context window in tokens.
    pub max_tokens: usize,
    /// Multiplier applied to raw estimates to absorb estimation error.
    pub fudge_factor: f64,
    /// Headroom subtracted before the pruner computes available space.
    pub safety_margin_tokens: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_CONTEXT_WINDOW,
            fudge_factor: DEFAULT_FUDGE_FACTOR,
            safety_margin_tokens: DEFAULT_SAFETY_MARGIN_TOKENS,
        }
    }
}

impl TokenBudget {
    /// Override the context window size (in tokens).
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Override the estimate multiplier.
    pub fn with_fudge_factor(mut self, factor: f64) -> Self {
        self.fudge_factor = factor;
        self
    }

    /// Override the pruner's headroom.
    pub fn with_safety_margin(mut self, tokens: usize) -> Self {
        self.safety_margin_tokens = tokens;
        self
    }

    /// Budgeted usage of a system prompt plus transcript.
    pub fn measure(
        &self,
        estimator: &TokenEstimator,
        messages: &[Message],
        system_prompt: &str,
    ) -> ContextUsage {
        let tokens_used = estimator.budgeted_tokens(system_prompt, self.fudge_factor)
            + estimator.budgeted_transcript_tokens(messages, self.fudge_factor);
        let percentage = if self.max_tokens > 0 {
            tokens_used as f64 * 100.0 / self.max_tokens as f64
        } else {
            100.0
        };
        ContextUsage {
            tokens_used,
            max_tokens: self.max_tokens,
            percentage,
        }
    }
}

/// Knobs controlling condensation and the protected recent window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Attempt LLM condensation when usage crosses the threshold.
    pub auto_condense: bool,
    /// Usage percentage (of `max_tokens`) that triggers condensation.
    pub condense_threshold_percent: u32,
    /// Number of trailing messages never summarized or evicted.
    pub keep_recent_count: usize,
    /// Upper bound on one summarization request. `None` waits indefinitely.
    pub condense_timeout_ms: Option<u64>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            auto_condense: true,
            condense_threshold_percent: DEFAULT_CONDENSE_THRESHOLD_PERCENT,
            keep_recent_count: DEFAULT_KEEP_RECENT,
            condense_timeout_ms: Some(DEFAULT_CONDENSE_TIMEOUT_MS),
        }
    }
}

impl ContextSettings {
    /// Enable or disable automatic condensation.
    pub fn with_auto_condense(mut self, enabled: bool) -> Self {
        self.auto_condense = enabled;
        self
    }

    /// Set the condensation trigger percentage.
    pub fn with_threshold_percent(mut self, percent: u32) -> Self {
        self.condense_threshold_percent = percent;
        self
    }

    /// Set the size of the protected recent window.
    pub fn with_keep_recent(mut self, count: usize) -> Self {
        self.keep_recent_count = count;
        self
    }

    /// Set (or clear) the summarization timeout.
    pub fn with_condense_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.condense_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Summarization timeout as a [`Duration`].
    pub fn condense_timeout(&self) -> Option<Duration> {
        self.condense_timeout_ms.map(Duration::from_millis)
    }
}

/// Budget and settings loaded together from a JSON file.
///
/// Every field is optional in the file; missing values take their defaults.
///
/// ```json
/// {
///   "budget": { "max_tokens": 128000 },
///   "settings": { "keep_recent_count": 12, "auto_condense": false }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub budget: TokenBudget,
    pub settings: ContextSettings,
}

impl ContextConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, TranscriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| TranscriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TranscriptError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    /// Budgeted tokens consumed by system prompt and transcript.
    pub tokens_used: usize,
    /// Model context window.
    pub max_tokens: usize,
    /// Usage as a percentage of `max_tokens` (may exceed 100).
    pub percentage: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.tokens_used, self.percentage, self.max_tokens,
        )
    }
}
