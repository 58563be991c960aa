//! Redundant output optimizer: keep one live copy of repeated read-only
//! tool results.
//!
//! Agents re-read the same file or re-run the same search constantly. For
//! tools on the read-only allow-list ([`names::READ_ONLY_TOOLS`]), an
//! identical later call makes every earlier result obsolete, so the earlier
//! result's content is replaced by a one-line pointer to the newer one.
//!
//! Calls are matched on `(tool name, canonical arguments)`. Arguments are
//! re-serialized with object keys sorted at every depth, so `{"a":1,"b":2}`
//! and `{"b":2,"a":1}` are the same call.

use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use crate::Message;
use crate::context::eviction::summarize_args;
use crate::context::names;

/// Prefix of every superseded-result placeholder.
pub const SUPERSEDED_PREFIX: &str = "[Superseded:";

/// Replace earlier results of repeated read-only tool calls with a
/// placeholder, keeping the newest occurrence intact.
///
/// Never removes a message or a block, so the output has the same length
/// and shape as the input and tool-call pairing is unaffected.
pub fn supersede_duplicate_reads(messages: &[Message]) -> Vec<Message> {
    let mut calls: HashMap<&str, (&str, String, &Value)> = HashMap::new();
    for msg in messages {
        for tool_use in &msg.tool_uses {
            if names::is_read_only(&tool_use.name) {
                calls.insert(
                    tool_use.id.as_str(),
                    (
                        tool_use.name.as_str(),
                        canonical_args(&tool_use.input),
                        &tool_use.input,
                    ),
                );
            }
        }
    }

    let mut out = messages.to_vec();
    if calls.is_empty() {
        return out;
    }

    // (name, canonical args) → position of the newest result seen so far.
    let mut latest: HashMap<(&str, &str), (usize, usize)> = HashMap::new();
    let mut superseded = 0usize;

    for (msg_idx, msg) in messages.iter().enumerate() {
        for (block_idx, result) in msg.tool_results.iter().enumerate() {
            let Some((name, canonical, input)) = calls.get(result.tool_use_id.as_str()) else {
                continue;
            };
            let key = (*name, canonical.as_str());
            if let Some((prev_msg, prev_block)) = latest.insert(key, (msg_idx, block_idx)) {
                let placeholder = superseded_placeholder(name, input);
                let block = &mut out[prev_msg].tool_results[prev_block];
                if block.content != placeholder {
                    block.content = placeholder;
                    superseded += 1;
                }
            }
        }
    }

    if superseded > 0 {
        info!("Superseded {superseded} duplicate read-only tool result(s)");
    }
    out
}

fn superseded_placeholder(name: &str, input: &Value) -> String {
    format!(
        "{SUPERSEDED_PREFIX} {name}({}) was re-run later; see the newer result]",
        summarize_args(input, 120)
    )
}

/// Order-independent serialization of tool arguments.
///
/// A string input that itself holds a JSON object or array (the OpenAI
/// `arguments` convention) is parsed first so both encodings compare equal.
pub fn canonical_args(input: &Value) -> String {
    if let Value::String(s) = input
        && let Ok(parsed @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(s)
    {
        return canonical_args(&parsed);
    }
    let mut out = String::new();
    write_canonical(input, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
