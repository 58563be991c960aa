//! Token estimation for budgeting decisions.
//!
//! Exact token counts depend on the vendor tokenizer, which may not be
//! available (or may fail to load). [`TokenEstimator`] wraps an optional
//! exact [`Tokenizer`] that is constructed lazily on first use and falls back
//! permanently to a `len / 4` heuristic if construction fails. Budget checks
//! use the `budgeted_*` variants, which scale raw estimates by a fudge factor
//! to absorb estimation error.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::Message;

/// Characters per token assumed by the heuristic fallback.
pub const HEURISTIC_CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message cost modelling role markers and formatting tokens.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// A text tokenizer.
///
/// Implementations must be read-only: the estimator shares one instance
/// across every conversation in the process.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;

    /// Short name for logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Length-based estimate: one token per four bytes of text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        text.len() / HEURISTIC_CHARS_PER_TOKEN
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Builds the exact tokenizer. Called at most once per estimator.
pub type TokenizerFactory = Box<dyn Fn() -> Result<Arc<dyn Tokenizer>, String> + Send + Sync>;

/// Converts text and messages into approximate token counts.
///
/// Share one estimator per process via `Arc<TokenEstimator>`. The exact
/// tokenizer is built on the first estimate; concurrent first callers block
/// on the same [`OnceLock`] and exactly one of them runs the factory. All
/// later estimates read the initialised cell without locking.
pub struct TokenEstimator {
    factory: Option<TokenizerFactory>,
    tokenizer: OnceLock<Option<Arc<dyn Tokenizer>>>,
}

impl TokenEstimator {
    /// Estimator backed by an exact tokenizer built lazily by `factory`.
    ///
    /// If the factory returns an error, the heuristic is used for the rest
    /// of the estimator's lifetime; the factory is never retried.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Tokenizer>, String> + Send + Sync + 'static,
    {
        Self {
            factory: Some(Box::new(factory)),
            tokenizer: OnceLock::new(),
        }
    }

    /// Estimator backed by an already-constructed tokenizer.
    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            factory: None,
            tokenizer: OnceLock::from(Some(tokenizer)),
        }
    }

    /// Estimator that only ever uses the `len / 4` heuristic. Deterministic,
    /// which makes it the right choice for tests.
    pub fn heuristic() -> Self {
        Self {
            factory: None,
            tokenizer: OnceLock::from(None),
        }
    }

    fn tokenizer(&self) -> Option<&dyn Tokenizer> {
        self.tokenizer
            .get_or_init(|| {
                let factory = self.factory.as_ref()?;
                match factory() {
                    Ok(tokenizer) => {
                        debug!("Tokenizer initialised: {}", tokenizer.name());
                        Some(tokenizer)
                    }
                    Err(e) => {
                        warn!("Tokenizer unavailable, falling back to length heuristic: {e}");
                        None
                    }
                }
            })
            .as_deref()
    }

    /// Name of the tokenizer in effect (initialising it if needed).
    pub fn tokenizer_name(&self) -> &str {
        self.tokenizer().map_or("heuristic", |t| t.name())
    }

    /// Raw token estimate for a piece of text. Empty text costs nothing.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.tokenizer() {
            Some(tokenizer) => tokenizer.count(text),
            None => HeuristicTokenizer.count(text),
        }
    }

    /// Raw token estimate for a message: text, tool call names and inputs,
    /// tool result contents, plus a fixed per-message overhead.
    pub fn estimate_message_tokens(&self, msg: &Message) -> usize {
        let mut tokens = self.estimate_tokens(&msg.content) + MESSAGE_OVERHEAD_TOKENS;
        for tool_use in &msg.tool_uses {
            tokens += self.estimate_tokens(&tool_use.name);
            tokens += self.estimate_tokens(&input_text(&tool_use.input));
        }
        for result in &msg.tool_results {
            tokens += self.estimate_tokens(&result.content);
        }
        tokens
    }

    /// Raw token estimate for a whole transcript.
    pub fn estimate_transcript_tokens(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_message_tokens(m))
            .sum()
    }

    /// Text estimate scaled by `fudge_factor`, rounded up.
    pub fn budgeted_tokens(&self, text: &str, fudge_factor: f64) -> usize {
        apply_fudge(self.estimate_tokens(text), fudge_factor)
    }

    /// Message estimate scaled by `fudge_factor`, rounded up.
    pub fn budgeted_message_tokens(&self, msg: &Message, fudge_factor: f64) -> usize {
        apply_fudge(self.estimate_message_tokens(msg), fudge_factor)
    }

    /// Sum of per-message budgeted estimates. Summing rounded per-message
    /// values keeps this consistent with the pruner's incremental scan.
    pub fn budgeted_transcript_tokens(&self, messages: &[Message], fudge_factor: f64) -> usize {
        messages
            .iter()
            .map(|m| self.budgeted_message_tokens(m, fudge_factor))
            .sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.tokenizer.get() {
            None => "uninitialised",
            Some(None) => "heuristic",
            Some(Some(t)) => t.name(),
        };
        f.debug_struct("TokenEstimator")
            .field("tokenizer", &state)
            .finish()
    }
}

fn apply_fudge(raw: usize, fudge_factor: f64) -> usize {
    if raw == 0 {
        return 0;
    }
    (raw as f64 * fudge_factor.max(0.0)).ceil() as usize
}

/// Text form of a tool input used for counting. Plain strings are counted
/// as-is rather than with JSON quoting.
fn input_text(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
