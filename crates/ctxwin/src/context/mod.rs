//! Context window management: estimation, optimization, pruning, and
//! condensation.
//!
//! Each turn, [`ContextManager`] runs the transcript through these stages:
//!
//! 1. **[`dedup`]**: earlier results of repeated read-only tool calls
//!    (same tool, same canonical arguments) become one-line pointers to the
//!    newest result.
//!
//! 2. **[`condenser`]**: when usage crosses the configured threshold, the
//!    messages between the pinned task and the recent window are replaced by
//!    an LLM-written summary. All-or-nothing.
//!
//! 3. **[`pruner`]**: otherwise (or if condensation fails) the transcript is
//!    cut to the longest recent suffix that fits the budget. Before pruning,
//!    [`eviction`] replaces large tool outputs older than the recent window
//!    with a fixed placeholder.
//!
//! Every stage is a pure function of its input: nothing here edits a
//! transcript in place. Every stage preserves the pinned first message and
//! leaves no tool result without its tool call.
//!
//! Token counts come from [`TokenEstimator`], which uses a pluggable
//! [`Tokenizer`] and falls back to a `len / 4` heuristic.

pub mod budget;
pub mod condenser;
pub mod dedup;
pub mod eviction;
pub mod manager;
pub mod names;
pub mod pruner;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use budget::{ContextConfig, ContextSettings, ContextUsage, TokenBudget};
pub use condenser::{CondenseResult, Condenser, SummarizeFuture, Summarizer};
pub use manager::{ContextManager, ContextResult};
pub use pruner::PruneOutcome;
pub use tokens::{HeuristicTokenizer, TokenEstimator, Tokenizer};
