//! LLM-assisted condensation: replace older messages with one summary.
//!
//! When usage crosses [`ContextSettings::condense_threshold_percent`], the
//! messages between the pinned task and the recent window are sent to a
//! [`Summarizer`] and replaced by a single summary message. The result is
//! `[pinned, summary, ...recent]`.
//!
//! Condensation is all-or-nothing. If the provider errors, times out,
//! returns nothing, or returns a summary that would not shrink the
//! transcript, the caller gets a [`CondenseError`] and the original
//! transcript is untouched. A previous summary found in the span being
//! condensed is merged into the new one rather than summarized as chat.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::Message;
use crate::context::budget::{ContextSettings, TokenBudget};
use crate::context::eviction::{summarize_args, truncate_chars};
use crate::context::pruner::{extend_for_tool_calls, strip_orphaned_results};
use crate::context::tokens::TokenEstimator;
use crate::error::CondenseError;

/// Prefix of every summary message produced by condensation.
pub const SUMMARY_PREFIX: &str = "[Conversation summary";

/// Tool outputs longer than this are clipped in the summarization prompt.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 4000;

/// Instructions placed at the top of every summarization prompt.
const CONDENSE_INSTRUCTIONS: &str = "\
You are compacting the history of a coding-agent session so the work can continue \
in a smaller context window. Write a dense summary of the messages below with these sections:

1. Goal: what the user asked for, including constraints and preferences.
2. Progress: what has been done so far, including commands run and their outcomes.
3. Technical decisions: approaches chosen, and approaches tried and abandoned with the reason.
4. File state: files read, created, or modified. Keep paths, function names, and error messages verbatim.
5. Next steps: what remains to be done, in order.

Rules:
- Only include facts stated in the messages. Do not infer or extrapolate.
- Be concise. Every line must earn its place.
- If an existing summary is provided, merge it with the new messages into a single \
standalone summary that replaces it entirely.";

/// Boxed future returned by [`Summarizer::summarize`].
pub type SummarizeFuture<'a> = Pin<Box<dyn Future<Output = Result<String, CondenseError>> + Send + 'a>>;

/// A provider that turns a summarization prompt into summary text.
///
/// Any LLM client can implement this. Implementations must be stateless
/// per request: independent conversations may call the same instance
/// concurrently. Dropping the returned future cancels the request.
///
/// # Example
///
/// ```ignore
/// struct MyClient { /* ... */ }
///
/// impl Summarizer for MyClient {
///     fn summarize<'a>(&'a self, prompt: &'a str) -> SummarizeFuture<'a> {
///         Box::pin(async move {
///             self.complete(prompt)
///                 .await
///                 .map_err(|e| CondenseError::Provider(e.to_string()))
///         })
///     }
/// }
/// ```
pub trait Summarizer: Send + Sync {
    /// Produce a summary for `prompt`.
    fn summarize<'a>(&'a self, prompt: &'a str) -> SummarizeFuture<'a>;
}

/// Outcome of a condensation attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct CondenseResult {
    /// The condensed transcript, or the original if nothing was condensed.
    pub messages: Vec<Message>,
    /// Summary text produced by the provider.
    pub summary: Option<String>,
    /// Whether the transcript was replaced.
    pub was_condensed: bool,
    /// Budgeted transcript tokens before condensation.
    pub tokens_before: usize,
    /// Budgeted transcript tokens after condensation.
    pub tokens_after: usize,
}

impl CondenseResult {
    fn unchanged(messages: &[Message], tokens: usize) -> Self {
        Self {
            messages: messages.to_vec(),
            summary: None,
            was_condensed: false,
            tokens_before: tokens,
            tokens_after: tokens,
        }
    }
}

/// Condenses transcripts for one budget and set of settings.
pub struct Condenser<'a> {
    estimator: &'a TokenEstimator,
    settings: &'a ContextSettings,
    budget: &'a TokenBudget,
    summarizer: Option<&'a dyn Summarizer>,
}

impl<'a> Condenser<'a> {
    /// A condenser with no summarizer; [`condense`](Self::condense) is then a no-op.
    pub fn new(
        estimator: &'a TokenEstimator,
        settings: &'a ContextSettings,
        budget: &'a TokenBudget,
    ) -> Self {
        Self {
            estimator,
            settings,
            budget,
            summarizer: None,
        }
    }

    /// Attach the summarization provider.
    pub fn with_summarizer(mut self, summarizer: &'a dyn Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Whether the transcript is long enough and full enough to condense.
    pub fn should_condense(&self, messages: &[Message], system_prompt: &str) -> bool {
        if messages.len() <= self.settings.keep_recent_count {
            return false;
        }
        let usage = self.budget.measure(self.estimator, messages, system_prompt);
        usage.percentage >= f64::from(self.settings.condense_threshold_percent)
    }

    /// Summarize everything between the pinned message and the recent window.
    ///
    /// Returns `Ok` with `was_condensed == false` when there is no summarizer
    /// or nothing to summarize. Returns `Err` when the provider fails; the
    /// caller's transcript is never modified either way.
    pub async fn condense(&self, messages: &[Message]) -> Result<CondenseResult, CondenseError> {
        let fudge = self.budget.fudge_factor;
        let tokens_before = self.estimator.budgeted_transcript_tokens(messages, fudge);

        let Some(summarizer) = self.summarizer else {
            debug!("No summarizer configured; skipping condensation");
            return Ok(CondenseResult::unchanged(messages, tokens_before));
        };

        let split = self.split_point(messages);
        if split <= 1 {
            debug!("Nothing between the pinned message and the recent window to condense");
            return Ok(CondenseResult::unchanged(messages, tokens_before));
        }
        let older = &messages[1..split];
        let recent = &messages[split..];

        let prompt = build_condense_prompt(older);
        debug!(
            "Condensing {} message(s), prompt {} chars",
            older.len(),
            prompt.len()
        );

        let request = summarizer.summarize(&prompt);
        let response = match self.settings.condense_timeout() {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| CondenseError::Timeout(limit))?,
            None => request.await,
        }?;

        let summary = response.trim();
        if summary.is_empty() {
            return Err(CondenseError::EmptySummary);
        }

        let pinned = &messages[0];
        let mut known: HashSet<String> = pinned.tool_use_ids().map(String::from).collect();
        let (recent, _) = strip_orphaned_results(recent.to_vec(), &mut known);

        let mut condensed = Vec::with_capacity(recent.len() + 2);
        condensed.push(pinned.clone());
        condensed.push(summary_message(summary, older.len()));
        condensed.extend(recent);

        let tokens_after = self.estimator.budgeted_transcript_tokens(&condensed, fudge);
        if tokens_after >= tokens_before {
            return Err(CondenseError::NoReduction {
                before: tokens_before,
                after: tokens_after,
            });
        }

        info!(
            "Condensed {} message(s) into a summary: {tokens_before} -> {tokens_after} tokens",
            older.len()
        );
        Ok(CondenseResult {
            messages: condensed,
            summary: Some(summary.to_string()),
            was_condensed: true,
            tokens_before,
            tokens_after,
        })
    }

    /// Index of the first message kept verbatim. Starts at
    /// `len - keep_recent` and moves earlier so no recent tool result loses
    /// its call to the summary.
    fn split_point(&self, messages: &[Message]) -> usize {
        let split = messages
            .len()
            .saturating_sub(self.settings.keep_recent_count)
            .max(1);
        if split >= messages.len() {
            return split;
        }
        extend_for_tool_calls(messages, split)
    }
}

/// Build the summarization prompt for a span of messages.
///
/// Earlier summary messages in the span are collected into an
/// `EXISTING SUMMARY` section; everything else is rendered one message per
/// paragraph with tool calls and (clipped) tool outputs inline.
pub fn build_condense_prompt(span: &[Message]) -> String {
    let mut prompt = String::from(CONDENSE_INSTRUCTIONS);

    let (existing, rest): (Vec<&Message>, Vec<&Message>) =
        span.iter().partition(|m| is_summary_message(m));

    if !existing.is_empty() {
        prompt.push_str("\n\n=== EXISTING SUMMARY ===\n");
        for msg in existing {
            prompt.push_str(strip_summary_header(&msg.content));
            prompt.push('\n');
        }
    }

    prompt.push_str("\n\n=== MESSAGES TO SUMMARIZE ===\n");
    for msg in rest {
        render_message(msg, &mut prompt);
    }
    prompt
}

fn render_message(msg: &Message, out: &mut String) {
    let role = msg.role;
    if !msg.content.trim().is_empty() {
        out.push_str(&format!("[{role}]: {}\n", msg.content));
    }
    for tool_use in &msg.tool_uses {
        out.push_str(&format!(
            "[{role} called {}({})]\n",
            tool_use.name,
            summarize_args(&tool_use.input, 200)
        ));
    }
    for result in &msg.tool_results {
        out.push_str(&format!(
            "[tool result {}]: {}\n",
            result.tool_use_id,
            truncate_chars(&result.content, MAX_TOOL_OUTPUT_CHARS)
        ));
    }
    out.push('\n');
}

/// Whether `msg` is a summary produced by an earlier condensation.
pub fn is_summary_message(msg: &Message) -> bool {
    msg.content.starts_with(SUMMARY_PREFIX)
}

fn summary_message(summary: &str, replaced: usize) -> Message {
    Message::user(format!(
        "{SUMMARY_PREFIX} of {replaced} earlier message(s)]\n\n{summary}"
    ))
}

fn strip_summary_header(content: &str) -> &str {
    match content.split_once("\n\n") {
        Some((header, body)) if header.starts_with(SUMMARY_PREFIX) => body,
        _ => content,
    }
}
