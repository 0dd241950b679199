//! Per-row lifecycle events.
//!
//! Every stage reports through [`row_event`] so all events carry the same
//! field set and can be filtered by `event`, `job_id` or `row_key`.

use std::time::Instant;

use super::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Completed,
    Failed,
    Skipped,
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOutcome::Completed => "completed",
            RowOutcome::Failed => "failed",
            RowOutcome::Skipped => "skipped",
        }
    }
}

/// Emit `row_<stage>_<outcome>` for `msg`.
pub fn row_event(msg: &Message, stage: &'static str, outcome: RowOutcome, started: Instant) {
    let event = format!("row_{}_{}", stage, outcome.as_str());
    let attempt = msg.feedback.as_ref().map(|fb| fb.attempt_number).unwrap_or(1);
    let duration_ms = started.elapsed().as_millis() as u64;

    match (&msg.error, outcome) {
        (Some(error), RowOutcome::Failed) => tracing::warn!(
            event = %event,
            job_id = %msg.job_id,
            row_key = %msg.row_key,
            stage,
            attempt,
            duration_ms,
            error = %error,
            "Row stage failed"
        ),
        _ => tracing::debug!(
            event = %event,
            job_id = %msg.job_id,
            row_key = %msg.row_key,
            stage,
            attempt,
            duration_ms,
            row_stage = %msg.row.stage,
            "Row stage finished"
        ),
    }
}
