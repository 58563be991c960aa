//! Per-turn orchestration of the context pipeline.
//!
//! [`ContextManager::manage_context`] is the single call an agent loop makes
//! before each model request:
//!
//! 1. Deduplicate repeated read-only tool results.
//! 2. If usage is over the condensation threshold and a [`Summarizer`] is
//!    configured, condense. On success the condensed transcript is returned.
//! 3. Otherwise, or if condensation fails, prune to the budget.
//!
//! The call never fails. A condensation error is reported in
//! [`ContextResult::condense_error`] alongside a usable, pruned transcript.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::Message;
use crate::context::budget::{ContextSettings, ContextUsage, TokenBudget};
use crate::context::condenser::{Condenser, Summarizer};
use crate::context::dedup::supersede_duplicate_reads;
use crate::context::pruner::{enforce_tool_pairing, prune};
use crate::context::tokens::TokenEstimator;
use crate::error::CondenseError;

/// Outcome of one [`ContextManager::manage_context`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextResult {
    /// Transcript to send to the model and persist as the new history.
    pub messages: Vec<Message>,
    /// Older messages were replaced by a summary.
    pub was_condensed: bool,
    /// The pruner removed at least one message.
    pub was_truncated: bool,
    /// Summary text, when condensed.
    pub summary: Option<String>,
    /// Budgeted tokens of system prompt plus final transcript.
    pub tokens_used: usize,
    /// Model context window.
    pub tokens_max: usize,
    /// `tokens_used` as a percentage of `tokens_max`.
    pub percentage: f64,
    /// Why condensation was attempted and abandoned, if it was.
    pub condense_error: Option<CondenseError>,
}

impl ContextResult {
    /// Final usage as a [`ContextUsage`] snapshot.
    pub fn usage(&self) -> ContextUsage {
        ContextUsage {
            tokens_used: self.tokens_used,
            max_tokens: self.tokens_max,
            percentage: self.percentage,
        }
    }

    fn finish(messages: Vec<Message>, usage: ContextUsage) -> Self {
        Self {
            messages,
            was_condensed: false,
            was_truncated: false,
            summary: None,
            tokens_used: usage.tokens_used,
            tokens_max: usage.max_tokens,
            percentage: usage.percentage,
            condense_error: None,
        }
    }
}

/// Keeps a conversation inside its token budget, turn by turn.
///
/// Holds no per-conversation state; one manager can serve any number of
/// conversations concurrently.
///
/// # Example
///
/// ```ignore
/// let manager = ContextManager::new(Arc::new(TokenEstimator::heuristic()))
///     .with_summarizer(Arc::new(OpenRouterSummarizer::new(key, "openai/gpt-4o-mini")));
///
/// let result = manager.manage_context(&history, SYSTEM, &settings, &budget).await;
/// if let Some(e) = &result.condense_error {
///     eprintln!("condensation skipped: {e}");
/// }
/// history = result.messages;
/// ```
#[derive(Clone)]
pub struct ContextManager {
    estimator: Arc<TokenEstimator>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl ContextManager {
    /// A manager that prunes but never condenses.
    pub fn new(estimator: Arc<TokenEstimator>) -> Self {
        Self {
            estimator,
            summarizer: None,
        }
    }

    /// Enable condensation through `summarizer`.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// The shared estimator.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Fit `messages` into `budget` for the next model call.
    pub async fn manage_context(
        &self,
        messages: &[Message],
        system_prompt: &str,
        settings: &ContextSettings,
        budget: &TokenBudget,
    ) -> ContextResult {
        let estimator = self.estimator.as_ref();
        let initial = budget.measure(estimator, messages, system_prompt);
        debug!(
            "Managing {} message(s), {} (tokenizer: {})",
            messages.len(),
            initial.to_log_string(),
            estimator.tokenizer_name()
        );

        let optimized = supersede_duplicate_reads(messages);

        let mut condense_error = None;
        if settings.auto_condense
            && let Some(summarizer) = self.summarizer.as_deref()
        {
            let condenser = Condenser::new(estimator, settings, budget).with_summarizer(summarizer);
            if condenser.should_condense(&optimized, system_prompt) {
                match condenser.condense(&optimized).await {
                    Ok(condensed) if condensed.was_condensed => {
                        let usage = budget.measure(estimator, &condensed.messages, system_prompt);
                        info!("Condensed transcript, {}", usage.to_log_string());
                        let mut result = ContextResult::finish(condensed.messages, usage);
                        result.was_condensed = true;
                        result.summary = condensed.summary;
                        return result;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Condensation failed, falling back to pruning: {e}");
                        condense_error = Some(e);
                    }
                }
            }
        }

        let (final_messages, was_truncated) = if optimized.len() > 2 {
            let outcome = prune(
                estimator,
                &optimized,
                system_prompt,
                budget,
                settings.keep_recent_count,
            );
            let truncated = outcome.was_truncated();
            (outcome.messages, truncated)
        } else {
            let (paired, stripped) = enforce_tool_pairing(optimized);
            if stripped > 0 {
                warn!("Removed {stripped} message(s) holding only unpaired tool results");
            }
            (paired, false)
        };

        let usage = budget.measure(estimator, &final_messages, system_prompt);
        debug!("Context after management: {}", usage.to_log_string());
        let mut result = ContextResult::finish(final_messages, usage);
        result.was_truncated = was_truncated;
        result.condense_error = condense_error;
        result
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("estimator", &self.estimator)
            .field("summarizer", &self.summarizer.is_some())
            .finish()
    }
}
