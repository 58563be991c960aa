//! HTTP-backed summarization providers.
//!
//! - [`openrouter`]: [`OpenRouterSummarizer`], a [`Summarizer`](crate::context::Summarizer)
//!   that calls the OpenRouter chat-completions endpoint.
//! - [`retry`]: backoff schedule and transient-status detection (429, 5xx).

pub mod openrouter;
pub mod retry;

// Re-export commonly used items at the module level.
pub use openrouter::OpenRouterSummarizer;
pub use retry::RetryConfig;
