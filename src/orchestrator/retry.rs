//! Multi-attempt enrichment driver.
//!
//! Each attempt pushes every still-pending row through the pipeline once.
//! Afterwards every row is evaluated: rows that errored or passed are
//! finalized, and rows the retry policy accepts go around again with
//! feedback built from their attempt history.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::evaluator::{DefaultQualityEvaluator, QualityEvaluator};
use super::feedback_builder::{DefaultFeedbackBuilder, FeedbackBuilder};
use super::policy::{DefaultRetryPolicy, RetryPolicy};
use crate::error::{PipelineError, StateError};
use crate::feedback::{Attempt, AttemptStore, EnrichmentFeedback, InMemoryAttemptStore};
use crate::models::{ColumnMetadata, EnrichmentResult, RowStage};
use crate::pipeline::{Message, Pipeline, RunContext};
use crate::state::{RowUpdate, StateManager};

/// Outcome counts of a [`RetryOrchestrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub job_id: String,
    pub total_rows: usize,
    /// Highest attempt number any row reached.
    pub attempts: u32,
    /// Rows whose final assessment passed.
    pub passed: usize,
    /// Rows finalized with a stage error.
    pub errored: usize,
    /// Rows finalized below threshold because retrying stopped.
    pub exhausted: usize,
    /// Retry attempts scheduled across all rows.
    pub retries: usize,
    /// The job was cancelled or paused before it could complete.
    pub cancelled: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Passed,
    Errored,
    Exhausted,
}

/// Per-row retry bookkeeping between attempts.
struct PendingRow {
    feedback: EnrichmentFeedback,
    focus_columns: Vec<String>,
    policy: Box<dyn RetryPolicy>,
}

/// Runs rows through a [`Pipeline`] repeatedly until each passes evaluation
/// or the retry policy gives up.
pub struct RetryOrchestrator {
    pipeline: Pipeline,
    state: Arc<StateManager>,
    evaluator: Arc<dyn QualityEvaluator>,
    feedback_builder: Arc<dyn FeedbackBuilder>,
    policy: Box<dyn RetryPolicy>,
    attempts: Arc<dyn AttemptStore>,
}

impl RetryOrchestrator {
    /// Defaults: [`DefaultQualityEvaluator`], [`DefaultFeedbackBuilder`],
    /// [`DefaultRetryPolicy`] and an in-memory attempt store.
    pub fn new(pipeline: Pipeline) -> Self {
        let state = pipeline.state().clone();
        Self {
            pipeline,
            state,
            evaluator: Arc::new(DefaultQualityEvaluator),
            feedback_builder: Arc::new(DefaultFeedbackBuilder),
            policy: Box::new(DefaultRetryPolicy::default()),
            attempts: Arc::new(InMemoryAttemptStore::new()),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_feedback_builder(mut self, builder: Arc<dyn FeedbackBuilder>) -> Self {
        self.feedback_builder = builder;
        self
    }

    /// Every row gets its own copy of `policy` via [`RetryPolicy::fresh`].
    pub fn with_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_store(mut self, store: Arc<dyn AttemptStore>) -> Self {
        self.attempts = store;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }

    /// Enrich `row_keys` of a running job, retrying weak rows.
    ///
    /// Every row ends `COMPLETED` (keeping its error, if any) unless the job
    /// is halted first, in which case the job is left as it is and the
    /// summary is flagged `cancelled`. Only setup errors are returned.
    pub async fn run(
        &self,
        ctx: &RunContext,
        job_id: &str,
        row_keys: &[String],
        columns: Vec<ColumnMetadata>,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        self.state.initialize_job(job_id, row_keys).await?;

        let columns = Arc::new(columns);
        let threshold = self.policy.confidence_threshold();
        let max_attempts = self.policy.max_attempts().max(1);
        let mut summary = RunSummary {
            job_id: job_id.to_string(),
            total_rows: row_keys.len(),
            ..Default::default()
        };

        let mut pending: BTreeMap<String, PendingRow> = row_keys
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    PendingRow {
                        feedback: EnrichmentFeedback::first_attempt(),
                        focus_columns: Vec::new(),
                        policy: self.policy.fresh(),
                    },
                )
            })
            .collect();

        for attempt in 1..=max_attempts {
            if pending.is_empty() {
                break;
            }
            if self.halted(ctx, job_id).await {
                return Ok(self.abandon(summary, &pending, started));
            }
            summary.attempts = attempt;
            tracing::info!(job_id = %job_id, attempt, rows = pending.len(), "Starting enrichment attempt");

            let mut messages = Vec::with_capacity(pending.len());
            let mut unreadable = Vec::new();
            for (key, row) in &pending {
                match self.state.get_row(job_id, key).await {
                    Ok(state) => messages.push(
                        Message::new(job_id, state, columns.clone())
                            .with_feedback(row.feedback.clone()),
                    ),
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, row_key = %key, error = %e, "Row unreadable, skipping");
                        unreadable.push(key.clone());
                    }
                }
            }
            for key in unreadable {
                pending.remove(&key);
                self.attempts.delete(&key);
                summary.errored += 1;
            }

            let outputs = self.pipeline.execute(ctx, messages).await?;

            let mut finished = Vec::new();
            for msg in outputs {
                let Some(row) = pending.get_mut(&msg.row_key) else {
                    continue;
                };
                match self.evaluate_attempt(job_id, attempt, threshold, row, &msg).await {
                    Ok(Some(verdict)) => finished.push((msg.row_key, verdict)),
                    Ok(None) => summary.retries += 1,
                    Err(StateError::JobCancelled(_)) => {
                        return Ok(self.abandon(summary, &pending, started));
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, row_key = %msg.row_key, error = %e, "Retry reset failed");
                        finished.push((msg.row_key, Verdict::Exhausted));
                    }
                }
            }

            for (key, verdict) in finished {
                pending.remove(&key);
                self.finalize(job_id, &key, verdict, &mut summary).await;
            }
        }

        if self.halted(ctx, job_id).await {
            return Ok(self.abandon(summary, &pending, started));
        }

        for key in pending.keys() {
            tracing::warn!(job_id = %job_id, row_key = %key, attempts = summary.attempts, "Retry attempts exhausted");
            self.finalize(job_id, key, Verdict::Exhausted, &mut summary)
                .await;
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        if summary.cancelled {
            tracing::info!(job_id = %job_id, "Job halted during finalization");
        } else if let Err(e) = self.state.complete(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to mark job completed");
        }

        tracing::info!(
            job_id = %job_id,
            total_rows = summary.total_rows,
            attempts = summary.attempts,
            passed = summary.passed,
            errored = summary.errored,
            exhausted = summary.exhausted,
            retries = summary.retries,
            duration_ms = summary.duration_ms,
            "Enrichment run finished"
        );
        Ok(summary)
    }

    /// Record one attempt for the row in `msg` and decide its fate.
    ///
    /// `Ok(None)` means the row was reset and queued for another attempt.
    async fn evaluate_attempt(
        &self,
        job_id: &str,
        attempt: u32,
        threshold: f64,
        row: &mut PendingRow,
        msg: &Message,
    ) -> Result<Option<Verdict>, StateError> {
        let mut result = EnrichmentResult::from(&msg.row);
        if let Some(error) = &msg.error {
            result.error = Some(error.to_string());
        }
        let assessment = self.evaluator.evaluate(Some(&result), threshold);

        let mut history = self.attempts.get_or_create(&msg.row_key);
        history.record(Attempt {
            number: attempt,
            target_columns: row.focus_columns.clone(),
            patterns_used: msg.patterns.clone(),
            urls_crawled: msg.urls_used(),
            results: msg.row.extracted_data.clone(),
            confidences: msg.row.confidence.clone(),
            error: result.error.clone(),
            assessment: Some(assessment.clone()),
        });

        let verdict = if msg.error.is_some() {
            Some(Verdict::Errored)
        } else if assessment.passed {
            Some(Verdict::Passed)
        } else if !row.policy.should_retry(attempt, Some(&assessment)) {
            Some(Verdict::Exhausted)
        } else {
            None
        };

        if verdict.is_none() {
            row.focus_columns = assessment.weak_column_names();
            row.feedback = self
                .feedback_builder
                .build(Some(&history), &assessment.weak_columns);
        }
        self.attempts.save(history);

        if verdict.is_some() {
            return Ok(verdict);
        }

        self.state
            .transition(
                job_id,
                &msg.row_key,
                RowStage::Pending,
                RowUpdate::new().reset_for_retry(),
            )
            .await?;
        tracing::debug!(
            job_id = %job_id,
            row_key = %msg.row_key,
            attempt,
            focus = ?row.focus_columns,
            "Row queued for retry"
        );
        Ok(None)
    }

    /// Mark a row `COMPLETED`, restoring the best values seen across its
    /// attempts, and drop its history. The verdict is counted only once the
    /// row is actually `COMPLETED`.
    async fn finalize(&self, job_id: &str, key: &str, verdict: Verdict, summary: &mut RunSummary) {
        let history = self.attempts.get_or_create(key);
        self.attempts.delete(key);

        if verdict == Verdict::Errored {
            if let Some(error) = history.last_attempt().and_then(|a| a.error.clone()) {
                match self.persist_error(job_id, key, error).await {
                    Ok(()) => {}
                    Err(StateError::JobCancelled(_)) => {
                        summary.cancelled = true;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, row_key = %key, error = %e, "Failed to record row error");
                    }
                }
            }
        }

        let mut update = RowUpdate::new();
        if verdict != Verdict::Errored && history.count() > 1 {
            let best = history.best_partial();
            update = update
                .with_extracted(best.extracted_data, best.confidences)
                .with_sources(best.sources);
        }

        match self
            .state
            .transition(job_id, key, RowStage::Completed, update)
            .await
        {
            Ok(_) => {}
            Err(StateError::JobCancelled(_)) => {
                summary.cancelled = true;
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, row_key = %key, error = %e, "Failed to finalize row");
                return;
            }
        }

        match verdict {
            Verdict::Passed => summary.passed += 1,
            Verdict::Errored => summary.errored += 1,
            Verdict::Exhausted => summary.exhausted += 1,
        }
        tracing::debug!(job_id = %job_id, row_key = %key, verdict = ?verdict, attempts = history.count(), "Row finalized");
    }

    /// Store the attempt's error on a row that failed without one, e.g.
    /// when the stage's own state write was rejected.
    async fn persist_error(&self, job_id: &str, key: &str, error: String) -> Result<(), StateError> {
        let row = self.state.get_row(job_id, key).await?;
        if row.error.is_none() && row.stage.can_transition_to(RowStage::Failed) {
            self.state
                .transition(job_id, key, RowStage::Failed, RowUpdate::new().with_error(error))
                .await?;
        }
        Ok(())
    }

    /// An unreadable job status counts as a halt.
    async fn halted(&self, ctx: &RunContext, job_id: &str) -> bool {
        if ctx.is_shutdown() {
            return true;
        }
        match self.state.check_cancelled(job_id).await {
            Ok(halted) => halted,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job status unreadable, halting");
                true
            }
        }
    }

    fn abandon(
        &self,
        mut summary: RunSummary,
        pending: &BTreeMap<String, PendingRow>,
        started: Instant,
    ) -> RunSummary {
        for key in pending.keys() {
            self.attempts.delete(key);
        }
        summary.cancelled = true;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            job_id = %summary.job_id,
            unfinished = pending.len(),
            attempts = summary.attempts,
            "Enrichment halted"
        );
        summary
    }
}
