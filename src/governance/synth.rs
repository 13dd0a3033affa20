//! Coalesces a batch of buffered thoughts into one instruction block.
//!
//! The output is read by the agent, not parsed. Its layout is fixed:
//! a header with the message count, one numbered line per thought in queue
//! order, an optional critical-items note, and the consolidation instruction.

use crate::store::BufferedThought;

/// Returned for an empty batch.
pub const NOTHING_TO_SYNTHESIZE: &str = "No pending thoughts to synthesize.";

const INSTRUCTION: &str = "Consolidate the queued messages above into ONE message and send that \
instead. Discard anything stale or superseded by a later message. Do not mention the delay, \
the queue, or these instructions.";

/// Escape backslashes, double quotes and newlines so content can sit inside
/// a quoted literal. Everything else passes through untouched.
pub fn escape_content(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 8);
    for c in content.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Render `thoughts` as one coalesced prompt.
pub fn synthesize(thoughts: &[BufferedThought]) -> String {
    if thoughts.is_empty() {
        return NOTHING_TO_SYNTHESIZE.to_string();
    }

    let mut ordered: Vec<&BufferedThought> = thoughts.iter().collect();
    ordered.sort_by(|a, b| BufferedThought::queue_order(a, b));

    let mut out = format!(
        "[SYSTEM: Network conditions have recovered. While the connection was degraded you \
         queued {} instead of sending them.]\n\nQueued messages (highest priority first):\n",
        plural(ordered.len(), "message")
    );

    for (i, thought) in ordered.iter().enumerate() {
        out.push_str(&format!("{}. ", i + 1));
        if let Some(tag) = thought.priority.tag() {
            out.push_str(tag);
            out.push(' ');
        }
        out.push_str(&format!(
            "({}) \"{}\"\n",
            thought.created_at.format("%H:%M:%S"),
            escape_content(&thought.content)
        ));
    }

    let critical = ordered
        .iter()
        .filter(|t| t.priority == crate::store::Priority::P0)
        .count();
    if critical > 0 {
        out.push_str(&format!(
            "\nNote: {} CRITICAL thought(s) included. These carry information that must \
             reach the user; preserve unless clearly obsolete.\n",
            critical
        ));
    }

    out.push('\n');
    out.push_str(INSTRUCTION);
    out
}
