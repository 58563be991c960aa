//! Fit a saved conversation transcript into a context window.
//!
//! Reads a transcript (a JSON array of messages), runs it through the same
//! pipeline an agent loop would use before its next model call, and writes
//! the resulting transcript as JSON.
//!
//! # Examples
//!
//! ```sh
//! # Prune to a 32k window and print the result
//! ctxwin --transcript session.json --max-tokens 32000
//!
//! # Read from stdin, write to a file, show before/after stats
//! cat session.json | ctxwin --transcript - --output fitted.json --stats
//!
//! # Condense through OpenRouter (reads OPENROUTER_KEY)
//! ctxwin --transcript session.json --system-prompt-file prompt.md \
//!   --condense --model google/gemini-2.5-flash --threshold 60
//!
//! # Budget and settings from a file, with one override
//! ctxwin --transcript session.json --config ctxwin.json --keep-recent 12
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use ctxwin::Message;
use ctxwin::api::OpenRouterSummarizer;
use ctxwin::api::openrouter::DEFAULT_SUMMARY_MODEL;
use ctxwin::context::{ContextConfig, ContextManager, TokenEstimator};
use ctxwin::session::{TranscriptStats, load_transcript, save_transcript};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Fit a conversation transcript into a model's context window.
///
/// Set RUST_LOG (e.g. RUST_LOG=ctxwin=debug) for pipeline details.
#[derive(Parser)]
#[command(name = "ctxwin", version)]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Transcript JSON file, or `-` for stdin
    #[arg(long)]
    transcript: PathBuf,

    /// System prompt sent with the transcript (counts against the budget)
    #[arg(long, conflicts_with = "system_prompt_file")]
    system_prompt: Option<String>,

    /// Read the system prompt from a file
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// JSON file with `budget` and `settings` sections
    #[arg(long)]
    config: Option<PathBuf>,

    // ── Budget overrides ───────────────────────────────────────
    /// Model context window in tokens
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Multiplier applied to token estimates
    #[arg(long)]
    fudge_factor: Option<f64>,

    /// Tokens kept free of the window
    #[arg(long)]
    safety_margin: Option<usize>,

    // ── Settings overrides ─────────────────────────────────────
    /// Trailing messages never summarized or evicted
    #[arg(long)]
    keep_recent: Option<usize>,

    /// Usage percentage that triggers condensation
    #[arg(long)]
    threshold: Option<u32>,

    // ── Condensation ───────────────────────────────────────────
    /// Condense through OpenRouter when over the threshold
    #[arg(long)]
    condense: bool,

    /// Model used for summaries (with --condense)
    #[arg(long, default_value = DEFAULT_SUMMARY_MODEL)]
    model: String,

    // ── Output ─────────────────────────────────────────────────
    /// Write the resulting transcript here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print transcript stats before and after to stderr
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctxwin=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let messages = read_transcript(&cli.transcript)?;
    let system_prompt = match (&cli.system_prompt, &cli.system_prompt_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?,
        (None, None) => String::new(),
    };

    let ContextConfig {
        mut budget,
        mut settings,
    } = match &cli.config {
        Some(path) => ContextConfig::load(path).map_err(|e| e.to_string())?,
        None => ContextConfig::default(),
    };
    if let Some(max) = cli.max_tokens {
        budget = budget.with_max_tokens(max);
    }
    if let Some(factor) = cli.fudge_factor {
        budget = budget.with_fudge_factor(factor);
    }
    if let Some(margin) = cli.safety_margin {
        budget = budget.with_safety_margin(margin);
    }
    if let Some(keep) = cli.keep_recent {
        settings = settings.with_keep_recent(keep);
    }
    if let Some(pct) = cli.threshold {
        settings = settings.with_threshold_percent(pct);
    }

    let estimator = Arc::new(TokenEstimator::heuristic());
    let mut manager = ContextManager::new(Arc::clone(&estimator));
    if cli.condense {
        let summarizer = OpenRouterSummarizer::from_env(&cli.model)?;
        info!("Condensation enabled with {}", summarizer.model());
        manager = manager.with_summarizer(Arc::new(summarizer));
    }

    if cli.stats {
        eprintln!(
            "before: {} (~{} raw tokens)",
            TranscriptStats::of(&messages).to_log_string(),
            estimator.estimate_transcript_tokens(&messages)
        );
    }

    let result = manager
        .manage_context(&messages, &system_prompt, &settings, &budget)
        .await;

    if let Some(e) = &result.condense_error {
        eprintln!("  Warning: condensation skipped: {e}");
    }
    if cli.stats {
        eprintln!(
            "after:  {} (~{} raw tokens)",
            TranscriptStats::of(&result.messages).to_log_string(),
            estimator.estimate_transcript_tokens(&result.messages)
        );
    }
    eprintln!(
        "{} (condensed: {}, truncated: {})",
        result.usage().to_log_string(),
        result.was_condensed,
        result.was_truncated
    );

    match &cli.output {
        Some(path) => save_transcript(path, &result.messages).map_err(|e| e.to_string()),
        None => {
            let json = serde_json::to_string_pretty(&result.messages)
                .map_err(|e| format!("failed to serialize transcript: {e}"))?;
            println!("{json}");
            Ok(())
        }
    }
}

fn read_transcript(path: &Path) -> Result<Vec<Message>, String> {
    if path != Path::new("-") {
        return load_transcript(path).map_err(|e| e.to_string());
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    serde_json::from_str(&buf).map_err(|e| format!("invalid transcript on stdin: {e}"))
}
