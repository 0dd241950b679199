//! Work units passed between stages, and the run-wide shutdown signal.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::StageError;
use crate::feedback::EnrichmentFeedback;
use crate::models::{ColumnMetadata, RowState};

/// One row travelling through the pipeline.
///
/// Owned by whichever worker currently holds it. Correlate messages by
/// `row_key`; workers finish rows in no particular order.
#[derive(Debug, Clone)]
pub struct Message {
    pub job_id: String,
    pub row_key: String,
    /// Snapshot of the row as of the last successful transition.
    pub row: RowState,
    pub columns: Arc<Vec<ColumnMetadata>>,
    pub feedback: Option<EnrichmentFeedback>,
    /// Query patterns produced by the pattern stage.
    pub patterns: Vec<String>,
    /// Set once any stage fails this row; later stages pass it through.
    pub error: Option<StageError>,
}

impl Message {
    pub fn new(job_id: impl Into<String>, row: RowState, columns: Arc<Vec<ColumnMetadata>>) -> Self {
        Self {
            job_id: job_id.into(),
            row_key: row.key.clone(),
            row,
            columns,
            feedback: None,
            patterns: Vec::new(),
            error: None,
        }
    }

    pub fn with_feedback(mut self, feedback: EnrichmentFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// URLs this row's attempt actually used: crawled sources when the
    /// crawl ran, otherwise the decision's selection.
    pub fn urls_used(&self) -> Vec<String> {
        match (&self.row.crawl_results, &self.row.decision) {
            (Some(crawl), _) if !crawl.sources.is_empty() => crawl.sources.clone(),
            (_, Some(decision)) => decision.urls_to_crawl.clone(),
            _ => Vec::new(),
        }
    }
}

/// Shutdown signal shared by every task of a run.
///
/// Cloning is cheap. Triggering from any clone stops them all.
#[derive(Debug, Clone)]
pub struct RunContext {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signal every holder of this context to stop.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`RunContext::shutdown`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the context, so
        // `wait_for` only errors if every clone is gone.
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
