//! Simulated agent session: 40 turns of file reads and shell runs against
//! an 8k window, with a canned summarizer standing in for the LLM.
//!
//! Shows the manager deduplicating re-reads, condensing once usage crosses
//! the threshold, and reporting usage each turn. Runs offline.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=ctxwin=info cargo run --example simulated_session
//! ```

use std::sync::Arc;

use ctxwin::prelude::*;
use serde_json::json;

/// Pretends to be an LLM by reporting how much it was asked to summarize.
struct CannedSummarizer;

impl Summarizer for CannedSummarizer {
    fn summarize<'a>(&'a self, prompt: &'a str) -> SummarizeFuture<'a> {
        Box::pin(async move {
            Ok(format!(
                "Goal: refactor the parser.\nProgress: {} chars of history reviewed.\nNext steps: continue.",
                prompt.len()
            ))
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let manager = ContextManager::new(Arc::new(TokenEstimator::heuristic()))
        .with_summarizer(Arc::new(CannedSummarizer));
    let budget = TokenBudget::default().with_max_tokens(8_000);
    let settings = ContextSettings::default();
    let system_prompt = "You are a careful coding agent.";

    let mut history = vec![Message::user("Refactor src/parser.rs into smaller functions.")];

    for turn in 0..40 {
        let id = format!("call-{turn}");
        let (name, input) = if turn % 3 == 0 {
            ("read_file", json!({"path": "src/parser.rs"}))
        } else {
            ("shell", json!({"command": format!("cargo test parser::case_{turn}")}))
        };
        history.push(Message::assistant_tool_uses(
            format!("Turn {turn}"),
            vec![ToolUseBlock::new(&id, name, input)],
        ));
        history.push(Message::tool_result(&id, "output line\n".repeat(60)));

        let result = manager
            .manage_context(&history, system_prompt, &settings, &budget)
            .await;
        println!(
            "turn {turn:>2}: {:>3} messages, {}{}{}",
            result.messages.len(),
            result.usage().to_log_string(),
            if result.was_condensed { " [condensed]" } else { "" },
            if result.was_truncated { " [pruned]" } else { "" },
        );
        history = result.messages;
    }
}
