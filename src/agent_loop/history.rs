//! History compaction (§4.6 step 3).
//!
//! Grounded on the teacher's `TaskContext::push_hint_bounded` bounded-
//! collection idiom (drain-oldest-first on overflow), scaled from a single
//! hint vector up to whole-message history eviction.

use crate::domain::agent::{Turn, TurnPart, TurnRole};

/// A rough token estimate for `history`: ~4 characters per token, the same
/// coarse heuristic the teacher's context-window bookkeeping uses when no
/// real tokenizer is wired in.
#[must_use]
pub fn estimate_tokens(history: &[Turn]) -> u64 {
    let chars: usize = history
        .iter()
        .flat_map(|t| t.parts.iter())
        .map(|p| match p {
            TurnPart::Text { text } => text.len(),
            TurnPart::ToolCall { args, .. } => args.to_string().len(),
            TurnPart::ToolResponse { content, .. } => content.len(),
        })
        .sum();
    (chars / 4) as u64
}

fn flatten_for_summary(turns: &[Turn]) -> String {
    turns
        .iter()
        .flat_map(|t| t.parts.iter())
        .map(|p| match p {
            TurnPart::Text { text } => text.clone(),
            TurnPart::ToolCall { name, args, .. } => format!("[called {name} with {args}]"),
            TurnPart::ToolResponse { name, content, success, .. } => {
                format!("[{name} {} -> {content}]", if *success { "ok" } else { "failed" })
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarize everything but the first `keep_head` and last `keep_tail`
/// turns into one synthetic user turn, when token usage has crossed the
/// warning threshold. `summarize` renders the dropped middle into prose
/// (typically one more model call); callers pass a closure so this stays
/// synchronous and independently testable.
pub fn summarize_middle(
    history: &[Turn],
    keep_head: usize,
    keep_tail: usize,
    summarize: impl FnOnce(&str) -> String,
) -> Vec<Turn> {
    if history.len() <= keep_head + keep_tail {
        return history.to_vec();
    }
    let head = &history[..keep_head];
    let tail_start = history.len() - keep_tail;
    let middle = &history[keep_head..tail_start];
    let tail = &history[tail_start..];

    let summary_text = summarize(&flatten_for_summary(middle));
    let summary_turn = Turn::text(TurnRole::User, format!("[summary of {} earlier turns]\n{summary_text}", middle.len()));

    let mut result = Vec::with_capacity(keep_head + 1 + keep_tail);
    result.extend_from_slice(head);
    result.push(summary_turn);
    result.extend_from_slice(tail);
    result
}

/// Force-compact when history length ever exceeds the hard cap (200):
/// keep the first 2 and last 8 turns, inserting a "history truncated"
/// notice in between. Never calls out to a summarizer — this is the
/// backstop when even the soft summarization path has fallen behind.
#[must_use]
pub fn force_compact(history: &[Turn], hard_cap: usize) -> Vec<Turn> {
    const KEEP_HEAD: usize = 2;
    const KEEP_TAIL: usize = 8;
    if history.len() <= hard_cap {
        return history.to_vec();
    }
    let head = &history[..KEEP_HEAD.min(history.len())];
    let tail_start = history.len().saturating_sub(KEEP_TAIL);
    let tail = &history[tail_start.max(KEEP_HEAD)..];
    let dropped = history.len() - head.len() - tail.len();

    let mut result = Vec::with_capacity(head.len() + 1 + tail.len());
    result.extend_from_slice(head);
    result.push(Turn::text(
        TurnRole::User,
        format!("[history truncated: {dropped} turns dropped to stay under the hard cap]"),
    ));
    result.extend_from_slice(tail);
    result
}
