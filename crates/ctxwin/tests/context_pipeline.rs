//! End-to-end behaviour of the context pipeline through `ContextManager`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ctxwin::context::Condenser;
use ctxwin::context::condenser::is_summary_message;
use ctxwin::context::dedup::{SUPERSEDED_PREFIX, supersede_duplicate_reads};
use ctxwin::context::eviction::{EVICTION_PLACEHOLDER, evict_stale_outputs};
use ctxwin::context::pruner::{HIDDEN_NOTICE_PREFIX, prune};
use ctxwin::prelude::*;
use ctxwin::session::orphaned_tool_results;
use serde_json::json;

// ── Helpers ────────────────────────────────────────────────────────

/// Returns a fixed summary and counts calls.
struct MockSummarizer {
    text: String,
    calls: AtomicUsize,
}

impl MockSummarizer {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for MockSummarizer {
    fn summarize<'a>(&'a self, _prompt: &'a str) -> SummarizeFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.text.clone();
        Box::pin(async move { Ok(text) })
    }
}

/// Never answers.
struct StalledSummarizer;

impl Summarizer for StalledSummarizer {
    fn summarize<'a>(&'a self, _prompt: &'a str) -> SummarizeFuture<'a> {
        Box::pin(std::future::pending())
    }
}

fn estimator() -> Arc<TokenEstimator> {
    Arc::new(TokenEstimator::heuristic())
}

/// Exact-arithmetic budget: no fudge, no margin.
fn exact_budget(max_tokens: usize) -> TokenBudget {
    TokenBudget::default()
        .with_max_tokens(max_tokens)
        .with_fudge_factor(1.0)
        .with_safety_margin(0)
}

/// A user message costing exactly `tokens` under the heuristic.
fn filler(tokens: usize) -> Message {
    Message::user("f".repeat((tokens - 4) * 4))
}

fn call(id: &str, name: &str, input: serde_json::Value) -> Message {
    Message::assistant_tool_uses("", vec![ToolUseBlock::new(id, name, input)])
}

/// Pinned task followed by `turns` tool round-trips. Every fourth turn issues
/// two parallel calls answered in one message.
fn agent_session(turns: usize, output_chars: usize) -> Vec<Message> {
    let mut messages = vec![Message::user("Port the config loader to the new schema")];
    for turn in 0..turns {
        if turn % 4 == 3 {
            let (a, b) = (format!("p{turn}a"), format!("p{turn}b"));
            messages.push(Message::assistant_tool_uses(
                "Checking both",
                vec![
                    ToolUseBlock::new(&a, "grep", json!({"pattern": format!("fn t{turn}")})),
                    ToolUseBlock::new(&b, "shell", json!({"command": "cargo check"})),
                ],
            ));
            messages.push(Message::tool_results(vec![
                ToolResultBlock::new(&a, "g".repeat(output_chars)),
                ToolResultBlock::new(&b, "c".repeat(output_chars)),
            ]));
        } else {
            let id = format!("c{turn}");
            messages.push(call(
                &id,
                "read_file",
                json!({"path": format!("src/config/part{turn}.rs")}),
            ));
            messages.push(Message::tool_result(&id, "r".repeat(output_chars)));
        }
        messages.push(Message::assistant_text(format!("Turn {turn} done")));
    }
    messages
}

/// Budgeted tokens of system prompt plus transcript.
fn used(messages: &[Message], system_prompt: &str, budget: &TokenBudget) -> usize {
    budget
        .measure(&TokenEstimator::heuristic(), messages, system_prompt)
        .tokens_used
}

// ── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn pinned_message_survives_every_budget() {
    let manager = ContextManager::new(estimator());
    let messages = agent_session(30, 600);
    for max in [800, 2_000, 5_000, 20_000, 200_000] {
        let result = manager
            .manage_context(&messages, "sys", &ContextSettings::default(), &exact_budget(max))
            .await;
        assert_eq!(result.messages[0], messages[0], "max={max}");
    }
}

#[tokio::test]
async fn output_never_has_orphaned_results() {
    let manager = ContextManager::new(estimator());
    let messages = agent_session(40, 900);
    for max in (500..12_000).step_by(337) {
        for keep in [0, 3, 8] {
            let settings = ContextSettings::default().with_keep_recent(keep);
            let result = manager
                .manage_context(&messages, "sys", &settings, &exact_budget(max))
                .await;
            assert!(
                orphaned_tool_results(&result.messages).is_empty(),
                "max={max} keep={keep}"
            );
        }
    }
}

#[tokio::test]
async fn output_grows_by_at_most_one_message() {
    let summarizer = MockSummarizer::new("Goal: port loader. Progress: half.");
    let manager = ContextManager::new(estimator()).with_summarizer(summarizer.clone());
    let messages = agent_session(25, 500);
    for max in [600, 1_500, 4_000, 9_000, 50_000] {
        let result = manager
            .manage_context(&messages, "", &ContextSettings::default(), &exact_budget(max))
            .await;
        assert!(result.messages.len() <= messages.len() + 1, "max={max}");
    }
}

#[tokio::test]
async fn successful_condensation_reduces_tokens() {
    let summarizer = MockSummarizer::new("Goal: port loader. Next: tests.");
    let est = TokenEstimator::heuristic();
    let settings = ContextSettings::default();
    let budget = TokenBudget::default().with_max_tokens(4_000);
    let condenser = Condenser::new(&est, &settings, &budget).with_summarizer(summarizer.as_ref());

    let messages = agent_session(20, 400);
    assert!(condenser.should_condense(&messages, ""));
    let result = condenser.condense(&messages).await.unwrap();
    assert!(result.was_condensed);
    assert!(result.tokens_after < result.tokens_before);
    assert!(orphaned_tool_results(&result.messages).is_empty());
}

#[test]
fn estimator_is_zero_for_empty_and_monotonic() {
    let est = TokenEstimator::heuristic();
    assert_eq!(est.estimate_tokens(""), 0);
    let mut previous = 0;
    for len in 0..200 {
        let n = est.estimate_tokens(&"a".repeat(len));
        assert!(n >= previous);
        previous = n;
    }
}

#[test]
fn duplicate_read_keeps_only_the_newest_result() {
    let messages = vec![
        Message::user("task"),
        call("t1", "read_file", json!({"path": "src/lib.rs", "limit": 200})),
        Message::tool_result("t1", "first read"),
        call("t2", "read_file", json!({"limit": 200, "path": "src/lib.rs"})),
        Message::tool_result("t2", "second read"),
    ];
    let out = supersede_duplicate_reads(&messages);
    let placeholder = &out[2].tool_results[0].content;
    assert!(placeholder.starts_with(SUPERSEDED_PREFIX));
    assert!(placeholder.contains("read_file"));
    assert!(placeholder.contains("src/lib.rs"));
    assert_eq!(out[4].tool_results[0].content, "second read");
}

#[test]
fn pruner_is_a_noop_under_budget() {
    let messages = agent_session(10, 300);
    let budget = TokenBudget::default().with_max_tokens(100_000);
    let total = used(&messages, "system", &budget);
    assert!(total <= budget.max_tokens - budget.safety_margin_tokens);

    let out = prune(&TokenEstimator::heuristic(), &messages, "system", &budget, 8);
    assert_eq!(out.messages, messages);
    assert!(!out.was_truncated());
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn short_transcript_is_returned_unchanged() {
    let summarizer = MockSummarizer::new("unused");
    let manager = ContextManager::new(estimator()).with_summarizer(summarizer.clone());
    let mut messages = vec![Message::user("task")];
    messages.extend((0..7).map(|i| Message::assistant_text(format!("step {i}"))));

    let settings = ContextSettings::default();
    let budget = TokenBudget::default();
    let condenser = Condenser::new(manager.estimator(), &settings, &budget);
    assert!(!condenser.should_condense(&messages, ""));

    let result = manager.manage_context(&messages, "", &settings, &budget).await;
    assert_eq!(result.messages, messages);
    assert!(!result.was_condensed);
    assert!(!result.was_truncated);
    assert_eq!(summarizer.calls(), 0);
}

#[tokio::test]
async fn cutoff_keeps_tool_call_with_its_result() {
    // Pinned (10) + call (11) + result (50) + 60 fillers (10 each).
    // available = 665 - 10 = 655: the result and all fillers fit (650), the
    // call does not (661), so the naive window would orphan the result.
    let mut messages = vec![
        filler(10),
        call("t1", "read_file", json!({"path": "src/lib.rs"})),
        Message::tool_result("t1", "r".repeat(46 * 4)),
    ];
    messages.extend((0..60).map(|_| filler(10)));

    let manager = ContextManager::new(estimator());
    let result = manager
        .manage_context(&messages, "", &ContextSettings::default(), &exact_budget(665))
        .await;

    assert!(orphaned_tool_results(&result.messages).is_empty());
    let has_call = result.messages.iter().any(|m| m.tool_use_ids().any(|id| id == "t1"));
    let has_result = result.messages.iter().any(|m| m.tool_result_ids().any(|id| id == "t1"));
    assert!(has_call && has_result);
}

#[tokio::test]
async fn tighter_cutoff_drops_call_and_result_together() {
    let mut messages = vec![
        filler(10),
        call("t1", "read_file", json!({"path": "src/lib.rs"})),
        Message::tool_result("t1", "r".repeat(46 * 4)),
    ];
    messages.extend((0..60).map(|_| filler(10)));

    let manager = ContextManager::new(estimator());
    let result = manager
        .manage_context(&messages, "", &ContextSettings::default(), &exact_budget(400))
        .await;

    assert!(result.was_truncated);
    assert!(result.messages[1].content.starts_with(HIDDEN_NOTICE_PREFIX));
    assert!(orphaned_tool_results(&result.messages).is_empty());
    assert!(!result.messages.iter().any(|m| m.tool_result_ids().any(|id| id == "t1")));
}

#[tokio::test]
async fn old_large_tool_output_is_evicted() {
    let mut messages = vec![
        Message::user("task"),
        Message::assistant_text("looking"),
        call("big", "shell", json!({"command": "cat build.log"})),
        Message::tool_result("big", "L".repeat(5_000)),
    ];
    messages.extend((4..20).map(|i| Message::assistant_text(format!("message {i}"))));
    assert_eq!(messages.len(), 20);

    let evicted = evict_stale_outputs(&messages, 8);
    assert_eq!(evicted[3].tool_results[0].content, EVICTION_PLACEHOLDER);

    let result = ContextManager::new(estimator())
        .manage_context(&messages, "", &ContextSettings::default(), &TokenBudget::default())
        .await;
    assert_eq!(result.messages.len(), 20);
    assert_eq!(result.messages[3].tool_results[0].content, EVICTION_PLACEHOLDER);
    assert!(!result.was_truncated);
}

#[tokio::test]
async fn condenses_at_seventy_five_percent() {
    let summarizer = MockSummarizer::new("SUMMARY_TEXT");
    let manager = ContextManager::new(estimator()).with_summarizer(summarizer.clone());

    let mut messages = vec![Message::user("Fix the failing test")];
    messages.extend((1..20).map(|i| Message::assistant_text(format!("{i} {}", "w".repeat(200)))));
    let budget = TokenBudget::default().with_max_tokens(1_457);
    let before = budget.measure(manager.estimator(), &messages, "");
    assert!(before.percentage >= 70.0 && before.percentage < 80.0);

    let result = manager
        .manage_context(&messages, "", &ContextSettings::default(), &budget)
        .await;
    assert!(result.was_condensed);
    assert_eq!(result.summary.as_deref(), Some("SUMMARY_TEXT"));
    assert_eq!(result.messages.len(), 10);
    assert_eq!(result.messages[0], messages[0]);
    assert!(is_summary_message(&result.messages[1]));
    assert!(result.messages[1].content.contains("SUMMARY_TEXT"));
    assert_eq!(&result.messages[2..], &messages[12..]);
    assert_eq!(summarizer.calls(), 1);
}

#[tokio::test]
async fn repeated_read_file_is_superseded_end_to_end() {
    let mut messages = vec![
        Message::user("task"),
        call("r1", "read_file", json!({"path": "src/main.rs"})),
        Message::tool_result("r1", "fn main() {}"),
    ];
    messages.extend((3..9).map(|i| Message::assistant_text(format!("note {i}"))));
    messages.push(call("r2", "read_file", json!({"path": "src/main.rs"})));
    messages.push(Message::tool_result("r2", "fn main() { run() }"));
    assert_eq!(messages.len(), 11);

    let result = ContextManager::new(estimator())
        .manage_context(&messages, "", &ContextSettings::default(), &TokenBudget::default())
        .await;
    assert!(result.messages[2].tool_results[0].content.contains("read_file"));
    assert!(result.messages[2].tool_results[0].content.starts_with(SUPERSEDED_PREFIX));
    assert_eq!(result.messages[10].tool_results[0].content, "fn main() { run() }");
}

// ── Failure and concurrency ────────────────────────────────────────

#[tokio::test]
async fn summarizer_timeout_falls_back_to_pruning() {
    let manager = ContextManager::new(estimator()).with_summarizer(Arc::new(StalledSummarizer));
    let settings = ContextSettings::default().with_condense_timeout(Some(Duration::from_millis(20)));
    let messages = agent_session(20, 400);

    let result = manager
        .manage_context(&messages, "", &settings, &exact_budget(3_000))
        .await;
    assert!(!result.was_condensed);
    assert!(result.was_truncated);
    assert!(matches!(result.condense_error, Some(CondenseError::Timeout(_))));
    assert_eq!(result.messages[0], messages[0]);
    assert!(orphaned_tool_results(&result.messages).is_empty());
}

#[tokio::test]
async fn dropping_the_call_leaves_history_untouched() {
    let manager = ContextManager::new(estimator()).with_summarizer(Arc::new(StalledSummarizer));
    let settings = ContextSettings::default().with_condense_timeout(None);
    let messages = agent_session(20, 400);
    let snapshot = messages.clone();

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        manager.manage_context(&messages, "", &settings, &exact_budget(3_000)),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(messages, snapshot);
}

#[tokio::test]
async fn one_manager_serves_concurrent_conversations() {
    let summarizer = MockSummarizer::new("shared summary");
    let manager = ContextManager::new(estimator()).with_summarizer(summarizer.clone());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let messages = agent_session(10 + i, 400);
                let result = manager
                    .manage_context(
                        &messages,
                        "",
                        &ContextSettings::default(),
                        &TokenBudget::default().with_max_tokens(3_000),
                    )
                    .await;
                (messages[0].clone(), result)
            })
        })
        .collect();

    for handle in handles {
        let (pinned, result) = handle.await.unwrap();
        assert_eq!(result.messages[0], pinned);
        assert!(orphaned_tool_results(&result.messages).is_empty());
    }
    assert!(summarizer.calls() > 0);
}
