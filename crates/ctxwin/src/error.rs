//! Error types.
//!
//! Only two things in this crate can fail: asking a summarization provider
//! for a summary, and reading or writing transcript files. Token estimation,
//! optimization, eviction and pruning degrade instead of erroring.

use std::path::PathBuf;
use std::time::Duration;

/// Why a condensation attempt was abandoned.
///
/// Returned alongside a still-usable result: the pipeline falls back to
/// pruning and the transcript is left exactly as it was before the attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CondenseError {
    /// The summarization provider returned an error.
    #[error("summarization provider failed: {0}")]
    Provider(String),

    /// The provider did not answer within the configured timeout.
    #[error("summarization timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with no usable text.
    #[error("summarization provider returned an empty summary")]
    EmptySummary,

    /// The condensed transcript would not be smaller than the original.
    #[error("condensation did not reduce token usage ({before} -> {after} tokens)")]
    NoReduction { before: usize, after: usize },
}

/// Failure to load or store a transcript or configuration file.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
