//! Context window management for tool-using LLM agents.
//!
//! `ctxwin` keeps a growing, tool-augmented chat transcript inside a fixed
//! token budget. The core entry point is
//! [`ContextManager::manage_context`](context::ContextManager::manage_context):
//! the agent loop hands it the transcript for the next turn and gets back a
//! transcript that fits the model's context window, along with usage metrics.
//!
//! Two structural rules hold for every transcript the manager returns:
//!
//! - The first message (the original task) is **pinned** and always survives.
//! - No tool result is ever **orphaned**: each result references a tool call
//!   that is still present earlier in the transcript. Providers reject
//!   dangling tool results, so this is enforced by construction.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use ctxwin::prelude::*;
//!
//! let manager = ContextManager::new(Arc::new(TokenEstimator::heuristic()));
//! let settings = ContextSettings::default();
//! let budget = TokenBudget::default().with_max_tokens(128_000);
//!
//! let result = manager
//!     .manage_context(&messages, "You are a coding agent.", &settings, &budget)
//!     .await;
//!
//! println!("{}", result.usage().to_log_string());
//! send_to_model(&result.messages);
//! ```
//!
//! # Where to find things
//!
//! - **Token counting:** [`TokenEstimator`](context::TokenEstimator) and the
//!   [`Tokenizer`](context::Tokenizer) trait for plugging in an exact tokenizer.
//! - **Budgets and knobs:** [`TokenBudget`](context::TokenBudget),
//!   [`ContextSettings`](context::ContextSettings), and
//!   [`ContextConfig`](context::ContextConfig) for loading both from JSON.
//! - **Individual stages:** [`context::dedup`], [`context::eviction`],
//!   [`context::pruner`], [`context::condenser`].
//! - **LLM-backed summaries:** implement [`Summarizer`](context::Summarizer), or use
//!   [`OpenRouterSummarizer`](api::openrouter::OpenRouterSummarizer).
//! - **Transcript files:** [`session`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Token estimation, optimizer, evictor, pruner, condenser, manager |
//! | [`api`] | OpenRouter-backed summarizer |
//! | [`session`] | Transcript file I/O and structural diagnostics |
//! | [`error`] | Error types |

pub mod api;
pub mod context;
pub mod error;
pub mod prelude;
pub mod session;

use serde::{Deserialize, Serialize};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model. Only assistant messages carry these.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The output of a tool invocation, sent back on a user or tool-role message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: String,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }
}

/// A message in the conversation.
///
/// The pipeline treats messages as values: every stage clones what it
/// changes and returns a new transcript.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUseBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_uses: Vec::new(),
            tool_results: Vec::new(),
            reasoning: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// An assistant turn that requests one or more tool calls, with optional
    /// accompanying text.
    pub fn assistant_tool_uses(content: impl Into<String>, uses: Vec<ToolUseBlock>) -> Self {
        Self {
            tool_uses: uses,
            ..Self::with_role(MessageRole::Assistant, content)
        }
    }

    /// A tool-role message carrying a single result.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::tool_results(vec![ToolResultBlock::new(tool_use_id, content)])
    }

    /// A tool-role message carrying several results (parallel tool calls).
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            tool_results: results,
            ..Self::with_role(MessageRole::Tool, "")
        }
    }

    /// Attach model reasoning text.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Whether this message has nothing left to send: no text, no tool
    /// calls, no tool results.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_uses.is_empty() && self.tool_results.is_empty()
    }

    /// IDs of the tool calls this message produces.
    pub fn tool_use_ids(&self) -> impl Iterator<Item = &str> {
        self.tool_uses.iter().map(|u| u.id.as_str())
    }

    /// IDs of the tool calls this message answers.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.tool_results.iter().map(|r| r.tool_use_id.as_str())
    }
}
