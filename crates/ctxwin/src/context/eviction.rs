//! Stale tool output eviction: replace large, old tool results with a
//! fixed placeholder.
//!
//! Applies to results that sit outside the recent window and whose content
//! exceeds [`EVICTION_THRESHOLD_CHARS`]. Their content becomes
//! [`EVICTION_PLACEHOLDER`]. The result block and its `tool_use_id` are
//! kept, so every call still has its answer and the message count is
//! unchanged. The pinned first message is never touched.

use serde_json::Value;
use tracing::debug;

use crate::Message;

/// Tool results longer than this (in characters) are eligible for eviction.
pub const EVICTION_THRESHOLD_CHARS: usize = 2000;

/// Content substituted for an evicted tool result.
pub const EVICTION_PLACEHOLDER: &str =
    "[Cleared: old tool output removed to save context space. Re-run the tool if needed.]";

/// Replace oversized tool results in `[1, len - keep_recent)` with
/// [`EVICTION_PLACEHOLDER`].
///
/// The pinned first message and the trailing `keep_recent` messages are
/// never touched. Returns a new transcript of identical length and shape.
pub fn evict_stale_outputs(messages: &[Message], keep_recent: usize) -> Vec<Message> {
    let mut out = messages.to_vec();
    let end = messages.len().saturating_sub(keep_recent);
    let mut evicted = 0usize;

    for msg in out.iter_mut().take(end).skip(1) {
        for result in &mut msg.tool_results {
            if result.content.chars().count() > EVICTION_THRESHOLD_CHARS {
                result.content = EVICTION_PLACEHOLDER.to_string();
                evicted += 1;
            }
        }
    }

    if evicted > 0 {
        debug!("Evicted {evicted} stale tool output(s)");
    }
    out
}

/// Short `key=value` rendering of tool arguments for placeholders and
/// summarization prompts. Shows at most three fields and at most `max_len`
/// characters.
pub fn summarize_args(input: &Value, max_len: usize) -> String {
    let summary = match input {
        Value::Object(obj) => obj
            .iter()
            .take(3)
            .map(|(k, v)| {
                let val = match v {
                    Value::String(s) => format!("\"{}\"", truncate_chars(s, 40)),
                    other => truncate_chars(&other.to_string(), 40),
                };
                format!("{k}={val}")
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => return summarize_args(&parsed, max_len),
            _ => s.clone(),
        },
        other => other.to_string(),
    };
    truncate_chars(&summary, max_len)
}

/// Truncate to at most `max_chars` characters, ending in `...` when cut.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
