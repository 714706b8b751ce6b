use std::collections::BTreeSet;
use std::time::Duration;

use dbgate_approval::{render_approver_mentions, CommandRequest, ParseError};
use dbgate_postgres::{ExecutionError, QueryOutcome};

pub(super) const DONE_TEXT: &str = "DONE!";
pub(super) const NO_RESULTS_TEXT: &str = "No results found";

pub(super) fn render_code_block(text: &str) -> String {
    format!("```{text}```")
}

pub(super) fn render_parse_failure(error: &ParseError) -> String {
    format!("Failed to parse message: {error}")
}

pub(super) fn render_invalid_command(keyword: &str) -> String {
    format!("Invalid command {keyword}")
}

pub(super) fn render_approval_ack(requester: &str, approver: &str) -> String {
    format!("I hear ya <@{requester}>! Approved by <@{approver}>. Standby...")
}

/// Dry-run summary line: row count for reads, status for writes, or the
/// failure text when the preview itself failed.
pub(super) fn render_preview_outcome(result: &Result<QueryOutcome, ExecutionError>) -> String {
    match result {
        Ok(QueryOutcome::Rows(table)) if table.is_empty() => NO_RESULTS_TEXT.to_string(),
        Ok(QueryOutcome::Rows(table)) => format!("Total rows: {}", table.row_count()),
        Ok(QueryOutcome::Status(status)) => status.clone(),
        Err(error) => error.render_failure(),
    }
}

pub(super) fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// Builds the approval request posted in the mention thread.
pub(super) fn render_approval_request(
    request: &CommandRequest,
    preview: Option<(&str, Duration)>,
    approvers: &BTreeSet<String>,
) -> String {
    let mut text = format!(
        "Tasks to do:\n{}\n{}",
        request.command_line(),
        request.code_block
    );
    if let Some((summary, elapsed)) = preview {
        text.push_str(&format!(
            "\n\n&gt; Example output on preprod:\n{}\n&gt; Time taken: {}",
            render_code_block(summary),
            format_elapsed(elapsed)
        ));
    }
    text.push_str(&format!(
        "\n\nWaiting for approval from {}...",
        render_approver_mentions(approvers)
    ));
    text
}
