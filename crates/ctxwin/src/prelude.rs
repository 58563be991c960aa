//! Convenience re-exports for common `ctxwin` types.
//!
//! ```ignore
//! use ctxwin::prelude::*;
//! ```
//!
//! Covers what an agent loop needs to call the manager each turn: message
//! types, the manager and its result, budgets and settings, the estimator,
//! and the summarizer trait. Individual stages (pruner, dedup, eviction)
//! are left out; import those from their modules directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, ToolResultBlock, ToolUseBlock};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    ContextConfig, ContextManager, ContextResult, ContextSettings, ContextUsage, SummarizeFuture,
    Summarizer, TokenBudget, TokenEstimator, Tokenizer,
};
pub use crate::error::CondenseError;

// ── Providers ───────────────────────────────────────────────────────
pub use crate::api::OpenRouterSummarizer;
