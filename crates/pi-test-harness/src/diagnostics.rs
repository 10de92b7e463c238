//! Human-readable explanations for playbook and tool failures.

use std::fmt::Write as _;

use crate::playbook::PlaybookState;

pub const EXHAUSTED_MARKER: &str = "Playbook exhausted";
pub const NOT_CONSUMED_MARKER: &str = "Playbook not fully consumed";

const MAX_LISTED_ACTIONS: usize = 5;
const MAX_CAUSE_LINES: usize = 5;

pub fn format_exhausted(state: &PlaybookState) -> String {
    let last = state
        .last_consumed()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string());
    format!(
        "{EXHAUSTED_MARKER}: the agent asked for another response after all {} scripted \
         actions were consumed.\n\
         Last consumed action: {last}\n\
         Hint: extra generation calls usually mean a tool returned something unexpected and \
         the agent retried. Check the tool results or script the missing actions.",
        state.consumed()
    )
}

pub fn format_not_consumed(state: &PlaybookState) -> String {
    let remaining = state.remaining_actions();
    let mut out = format!(
        "{NOT_CONSUMED_MARKER}: {} consumed, {} remaining.\nRemaining actions:",
        state.consumed(),
        state.remaining()
    );
    for (index, action) in remaining.iter().take(MAX_LISTED_ACTIONS).enumerate() {
        let _ = write!(out, "\n  {}. {action}", state.consumed() + index + 1);
    }
    if remaining.len() > MAX_LISTED_ACTIONS {
        let _ = write!(out, "\n  ... and {} more", remaining.len() - MAX_LISTED_ACTIONS);
    }
    out.push_str(
        "\nHint: remaining actions usually mean a tool was blocked or returned early, \
         ending the turn before the playbook got to them.",
    );
    out
}

/// Explains a real tool failure that aborted the run.
pub fn format_tool_failure(step: usize, tool_name: &str, error: &anyhow::Error) -> String {
    let causes = error
        .chain()
        .flat_map(|cause| {
            cause
                .to_string()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .take(MAX_CAUSE_LINES)
        .collect::<Vec<_>>();

    let mut out = format!("Tool \"{tool_name}\" failed at playbook step {step}: {error}");
    if !causes.is_empty() {
        out.push_str("\nCause chain:");
        for line in causes {
            let _ = write!(out, "\n  {line}");
        }
    }
    out.push_str(
        "\nSet `propagate_errors: false` in HarnessOptions to record the failure as an \
         error result instead of aborting the run.",
    );
    out
}
