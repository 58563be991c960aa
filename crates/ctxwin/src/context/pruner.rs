//! Sliding-window pruner: keep the pinned task plus the longest recent
//! suffix of the transcript that fits the token budget.
//!
//! Pruning works backward from the newest message, so the model always sees
//! the latest turn. Two things make it more than a fixed-size window:
//!
//! - **Tool pairing.** Cutting between an assistant tool call and its result
//!   would leave an orphaned result, which providers reject. The cutoff is
//!   extended backward until every retained result has its call, and a final
//!   integrity pass strips anything still unpaired.
//! - **Recent floor.** Each of the three newest messages survives budget
//!   pressure as long as it costs less than a fifth of the available space,
//!   and the very last message is always kept.
//!
//! When messages are dropped for budget, a short notice message after the
//! pinned task tells the model how much history is hidden. Messages removed
//! only because they held nothing but unpaired tool results are counted
//! separately and get no notice.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::Message;
use crate::context::budget::TokenBudget;
use crate::context::eviction::evict_stale_outputs;
use crate::context::tokens::TokenEstimator;

/// How many of the newest messages get the recent-floor exemption.
pub const RECENT_FLOOR_MESSAGES: usize = 3;

/// Largest share of the available budget a single floor-exempt message may use.
pub const RECENT_FLOOR_FRACTION: f64 = 0.20;

/// Prefix of the notice inserted when messages are hidden.
pub const HIDDEN_NOTICE_PREFIX: &str = "[Context notice:";

/// Result of a pruning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneOutcome {
    /// The pruned transcript.
    pub messages: Vec<Message>,
    /// Input messages hidden to fit the budget.
    pub dropped: usize,
    /// Input messages removed because they held only unpaired tool results.
    pub stripped: usize,
}

impl PruneOutcome {
    fn unchanged(messages: Vec<Message>) -> Self {
        Self {
            messages,
            dropped: 0,
            stripped: 0,
        }
    }

    /// Whether any message was hidden to fit the budget.
    pub fn was_truncated(&self) -> bool {
        self.dropped > 0
    }
}

/// Fit `messages` into `budget` alongside `system_prompt`.
///
/// Stale tool outputs are evicted first (see
/// [`evict_stale_outputs`]); the trailing `keep_recent` messages are exempt
/// from that step. The output always starts with the pinned message (except
/// in the degenerate case where the system prompt and pinned message alone
/// exhaust the budget, when only the final message is returned), never
/// contains an orphaned tool result, and is at most one message longer than
/// the input.
pub fn prune(
    estimator: &TokenEstimator,
    messages: &[Message],
    system_prompt: &str,
    budget: &TokenBudget,
    keep_recent: usize,
) -> PruneOutcome {
    let messages = evict_stale_outputs(messages, keep_recent);
    if messages.is_empty() {
        return PruneOutcome::unchanged(messages);
    }
    let pinned = &messages[0];

    let fudge = budget.fudge_factor;
    let available = budget.max_tokens as i64
        - estimator.budgeted_tokens(system_prompt, fudge) as i64
        - estimator.budgeted_message_tokens(pinned, fudge) as i64
        - budget.safety_margin_tokens as i64;

    if available <= 0 {
        warn!(
            "System prompt and pinned message exhaust the {}-token budget; keeping only the last message",
            budget.max_tokens
        );
        return last_message_only(messages);
    }

    if messages.len() <= 2 {
        let (messages, stripped) = enforce_tool_pairing(messages);
        return PruneOutcome {
            messages,
            dropped: 0,
            stripped,
        };
    }

    let available = available as usize;
    let costs: Vec<usize> = messages
        .iter()
        .map(|m| estimator.budgeted_message_tokens(m, fudge))
        .collect();
    let suffix_tokens: usize = costs[1..].iter().sum();

    let cutoff = if suffix_tokens <= available {
        1
    } else {
        let cutoff = budget_cutoff(&costs, available);
        let extended = extend_for_tool_calls(&messages, cutoff);
        if extended < cutoff {
            debug!("Extended cutoff from {cutoff} to {extended} to keep tool calls paired");
        }
        extended
    };
    debug!(
        "Prune: {} messages, {suffix_tokens} tokens after pinned, {available} available, cutoff {cutoff}",
        messages.len()
    );

    let total = messages.len();
    let outcome = assemble(messages, cutoff);
    if outcome.was_truncated() {
        info!(
            "Pruned {} of {total} message(s) to fit the context window",
            outcome.dropped
        );
    }
    if outcome.stripped > 0 {
        warn!(
            "Removed {} message(s) holding only tool results with no matching call",
            outcome.stripped
        );
    }
    outcome
}

/// Backward accumulation: index of the first retained message.
///
/// `costs[0]` is the pinned message and is not counted here.
fn budget_cutoff(costs: &[usize], available: usize) -> usize {
    let n = costs.len();
    let floor = available as f64 * RECENT_FLOOR_FRACTION;
    // The final message is kept even if it alone exceeds the budget.
    let mut used = costs[n - 1];

    for i in (1..n - 1).rev() {
        let cost = costs[i];
        if used + cost > available {
            let recent = i + RECENT_FLOOR_MESSAGES >= n;
            if recent && (cost as f64) < floor {
                used += cost;
                continue;
            }
            return i + 1;
        }
        used += cost;
    }
    1
}

/// Move `cutoff` back until every retained tool result's call is retained
/// too. Stops at a fixpoint or at index 1.
pub(crate) fn extend_for_tool_calls(messages: &[Message], mut cutoff: usize) -> usize {
    while cutoff > 1 {
        let produced: HashSet<&str> = messages[0]
            .tool_use_ids()
            .chain(messages[cutoff..].iter().flat_map(|m| m.tool_use_ids()))
            .collect();
        let missing: HashSet<&str> = messages[cutoff..]
            .iter()
            .flat_map(|m| m.tool_result_ids())
            .filter(|id| !produced.contains(id))
            .collect();
        if missing.is_empty() {
            break;
        }

        let earliest = messages[1..cutoff]
            .iter()
            .position(|m| m.tool_use_ids().any(|id| missing.contains(id)))
            .map(|pos| pos + 1);
        match earliest {
            Some(idx) => cutoff = idx,
            // The calls are nowhere in the transcript; the integrity pass
            // strips those results.
            None => break,
        }
    }
    cutoff
}

/// `[pinned, notice?, retained...]` with orphaned results stripped.
fn assemble(mut messages: Vec<Message>, cutoff: usize) -> PruneOutcome {
    let retained = messages.split_off(cutoff);
    let skipped = messages.len() - 1;
    let mut prefix = messages.into_iter();
    let Some(pinned) = prefix.next() else {
        return PruneOutcome::unchanged(retained);
    };

    let mut known: HashSet<String> = pinned.tool_use_ids().map(String::from).collect();
    let (kept, stripped) = strip_orphaned_results(retained, &mut known);

    let mut out = Vec::with_capacity(kept.len() + 2);
    out.push(pinned);
    if skipped > 0 {
        out.push(hidden_notice(skipped));
    }
    out.extend(kept);
    PruneOutcome {
        messages: out,
        dropped: skipped,
        stripped,
    }
}

/// Integrity pass over a whole transcript: the pinned message is kept as-is
/// and seeds the known tool-use IDs; everything after it is stripped of
/// unpaired results. Returns the transcript and the number of messages
/// removed.
pub(crate) fn enforce_tool_pairing(messages: Vec<Message>) -> (Vec<Message>, usize) {
    let mut rest = messages.into_iter();
    let Some(pinned) = rest.next() else {
        return (Vec::new(), 0);
    };
    let mut known: HashSet<String> = pinned.tool_use_ids().map(String::from).collect();
    let (kept, removed) = strip_orphaned_results(rest.collect(), &mut known);

    let mut out = Vec::with_capacity(kept.len() + 1);
    out.push(pinned);
    out.extend(kept);
    (out, removed)
}

/// Extreme fallback when the budget has no room beyond the system prompt:
/// only the final message survives (or the pinned one, if the final message
/// is nothing but unpaired tool results).
fn last_message_only(mut messages: Vec<Message>) -> PruneOutcome {
    let total = messages.len();
    if total <= 1 {
        return PruneOutcome::unchanged(messages);
    }
    let Some(last) = messages.pop() else {
        return PruneOutcome::unchanged(messages);
    };

    let (mut kept, _) = strip_orphaned_results(vec![last], &mut HashSet::new());
    let survivor = match kept.pop() {
        Some(msg) => msg,
        None => messages.swap_remove(0),
    };
    PruneOutcome {
        messages: vec![survivor],
        dropped: total - 1,
        stripped: 0,
    }
}

/// Strip tool results whose call does not appear in `known` or an earlier
/// message of `messages`; drop messages left with nothing in them.
///
/// `known` holds the tool-use IDs of everything preceding `messages` and is
/// extended as the walk proceeds. Returns the surviving messages and the
/// number of messages dropped.
pub(crate) fn strip_orphaned_results(
    messages: Vec<Message>,
    known: &mut HashSet<String>,
) -> (Vec<Message>, usize) {
    let mut out = Vec::with_capacity(messages.len());
    let mut removed = 0;

    for mut msg in messages {
        if msg.tool_results.iter().any(|r| !known.contains(&r.tool_use_id)) {
            let before = msg.tool_results.len();
            msg.tool_results.retain(|r| known.contains(&r.tool_use_id));
            debug!(
                "Stripped {} orphaned tool result(s) from a {} message",
                before - msg.tool_results.len(),
                msg.role
            );
            if msg.is_empty() {
                removed += 1;
                continue;
            }
        }
        known.extend(msg.tool_use_ids().map(String::from));
        out.push(msg);
    }
    (out, removed)
}

fn hidden_notice(dropped: usize) -> Message {
    Message::user(format!(
        "{HIDDEN_NOTICE_PREFIX} {dropped} earlier message(s) were hidden to stay within the context window.]"
    ))
}
