//! Transcript files and structural diagnostics.
//!
//! A transcript file is a JSON array of [`Message`]s. Writes go to a temp
//! file in the same directory and are renamed into place, so a crash never
//! leaves a half-written transcript behind.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::Message;
use crate::error::TranscriptError;

/// Read a transcript file.
pub fn load_transcript(path: &Path) -> Result<Vec<Message>, TranscriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| TranscriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| TranscriptError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomic write: serialize to a temp file, then rename into place.
pub fn save_transcript(path: &Path, messages: &[Message]) -> Result<(), TranscriptError> {
    let io_err = |source| TranscriptError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(messages).map_err(|source| TranscriptError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript.json".into());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&tmp_path, json).map_err(io_err)?;
    std::fs::rename(&tmp_path, path).map_err(io_err)
}

/// Tool results with no matching tool call earlier in the transcript, as
/// `(message index, tool_use_id)` pairs. Empty for any transcript the
/// context pipeline produces.
pub fn orphaned_tool_results(messages: &[Message]) -> Vec<(usize, String)> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut orphans = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        for id in msg.tool_result_ids() {
            if !seen.contains(id) {
                orphans.push((idx, id.to_string()));
            }
        }
        seen.extend(msg.tool_use_ids());
    }
    orphans
}

/// Shape summary of a transcript, printed by `ctxwin --stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptStats {
    pub messages: usize,
    pub tool_calls: usize,
    pub tool_results: usize,
    pub orphaned_results: usize,
}

impl TranscriptStats {
    pub fn of(messages: &[Message]) -> Self {
        Self {
            messages: messages.len(),
            tool_calls: messages.iter().map(|m| m.tool_uses.len()).sum(),
            tool_results: messages.iter().map(|m| m.tool_results.len()).sum(),
            orphaned_results: orphaned_tool_results(messages).len(),
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "{} messages, {} tool calls, {} tool results, {} orphaned",
            self.messages, self.tool_calls, self.tool_results, self.orphaned_results
        )
    }
}
