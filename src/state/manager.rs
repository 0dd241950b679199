//! Job and row lifecycle management over a [`Store`].

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::store::Store;
use crate::error::{StateError, StoreError};
use crate::models::{
    CrawlResults, Decision, EnrichmentResult, FieldConfidence, FieldValue, Job, JobProgress,
    JobStatus, RowStage, RowState, SerpData,
};

/// Callback fired when a job is cancelled or paused.
pub type CancelHook = Arc<dyn Fn() + Send + Sync>;

/// Selective changes applied to a row by [`StateManager::transition`].
///
/// Unset fields leave the stored row untouched. Extracted data and
/// confidences merge key by key. Setting an error forces the row to
/// `FAILED` whatever stage was requested.
#[derive(Debug, Clone, Default)]
pub struct RowUpdate {
    serp_data: Option<SerpData>,
    decision: Option<Decision>,
    crawl_results: Option<CrawlResults>,
    extracted_data: Option<BTreeMap<String, FieldValue>>,
    confidence: Option<BTreeMap<String, FieldConfidence>>,
    sources: Option<Vec<String>>,
    error: Option<String>,
    reset: bool,
}

impl RowUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serp(mut self, serp: SerpData) -> Self {
        self.serp_data = Some(serp);
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_crawl(mut self, crawl: CrawlResults) -> Self {
        self.crawl_results = Some(crawl);
        self
    }

    pub fn with_extracted(
        mut self,
        data: BTreeMap<String, FieldValue>,
        confidence: BTreeMap<String, FieldConfidence>,
    ) -> Self {
        self.extracted_data = Some(data);
        self.confidence = Some(confidence);
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Clear the previous attempt's stage payloads before applying.
    pub fn reset_for_retry(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    fn apply(self, row: &mut RowState, to_stage: RowStage) {
        if self.reset {
            row.reset_for_retry();
        }
        row.stage = to_stage;
        if let Some(serp) = self.serp_data {
            row.serp_data = Some(serp);
        }
        if let Some(decision) = self.decision {
            row.decision = Some(decision);
        }
        if let Some(crawl) = self.crawl_results {
            row.crawl_results = Some(crawl);
        }
        if let Some(data) = self.extracted_data {
            row.extracted_data.extend(data);
        }
        if let Some(confidence) = self.confidence {
            row.confidence.extend(confidence);
        }
        if let Some(sources) = self.sources {
            row.sources = sources;
        }
        if let Some(error) = self.error {
            row.error = Some(error);
            row.stage = RowStage::Failed;
        }
    }
}

/// Owns job and row lifecycle transitions.
///
/// The manager is the only writer of row state during a run. All stage
/// workers and the orchestrator go through [`StateManager::transition`].
pub struct StateManager {
    store: Arc<dyn Store>,
    cancel_hooks: Mutex<HashMap<String, CancelHook>>,
}

impl StateManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cancel_hooks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a new `PENDING` job.
    pub async fn create_job(&self, total_rows: usize) -> Result<Job, StateError> {
        let job = Job::new(total_rows);
        self.store.create_job(&job).await?;
        tracing::info!(job_id = %job.id, total_rows, "Job created");
        Ok(job)
    }

    /// Move a job to `RUNNING` and stamp its start time.
    pub async fn start_job(&self, job_id: &str, total_rows: usize) -> Result<(), StateError> {
        self.store
            .start_job(job_id, total_rows)
            .await
            .map_err(|e| map_missing_job(e, job_id))?;
        tracing::info!(job_id = %job_id, total_rows, "Job started");
        Ok(())
    }

    /// Create one `PENDING` row per key for a running job.
    ///
    /// Fails with `JobNotFound` or `JobNotRunning` before touching rows.
    /// The bulk insert is all-or-nothing.
    pub async fn initialize_job(&self, job_id: &str, row_keys: &[String]) -> Result<(), StateError> {
        let status = self
            .store
            .get_job_status(job_id)
            .await?
            .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
        if status != JobStatus::Running {
            return Err(StateError::JobNotRunning {
                job_id: job_id.to_string(),
                status,
            });
        }

        self.store.bulk_create_rows(job_id, row_keys).await?;
        tracing::debug!(job_id = %job_id, rows = row_keys.len(), "Job rows initialized");
        Ok(())
    }

    /// Move a row to `to_stage`, applying `update`.
    ///
    /// If the job is paused, cancelled or completed the row is forced to
    /// `CANCELLED` (unless already terminal) and the call fails with
    /// `JobCancelled`. Repeating the call yields the same outcome.
    pub async fn transition(
        &self,
        job_id: &str,
        key: &str,
        to_stage: RowStage,
        update: RowUpdate,
    ) -> Result<RowState, StateError> {
        if self.check_cancelled(job_id).await? {
            if let Some(mut row) = self.store.get_row_state(job_id, key).await? {
                if !row.stage.is_terminal() {
                    row.stage = RowStage::Cancelled;
                    row.updated_at = Utc::now();
                    self.store.save_row_state(job_id, &row).await?;
                    tracing::debug!(job_id = %job_id, row_key = %key, "Row cancelled");
                }
            }
            return Err(StateError::JobCancelled(job_id.to_string()));
        }

        let mut row = self
            .store
            .get_row_state(job_id, key)
            .await?
            .ok_or_else(|| StateError::RowNotFound {
                job_id: job_id.to_string(),
                key: key.to_string(),
            })?;

        let target = if update.has_error() {
            RowStage::Failed
        } else {
            to_stage
        };
        let allowed = if update.reset && target == RowStage::Pending {
            row.stage.can_restart()
        } else {
            row.stage.can_transition_to(target)
        };
        if !allowed {
            return Err(StateError::InvalidTransition {
                key: key.to_string(),
                from: row.stage,
                to: target,
            });
        }

        let from = row.stage;
        update.apply(&mut row, to_stage);
        row.updated_at = Utc::now();
        self.store.save_row_state(job_id, &row).await?;

        tracing::trace!(
            job_id = %job_id,
            row_key = %key,
            from = %from,
            to = %row.stage,
            "Row transitioned"
        );
        Ok(row)
    }

    pub async fn get_row(&self, job_id: &str, key: &str) -> Result<RowState, StateError> {
        self.store
            .get_row_state(job_id, key)
            .await?
            .ok_or_else(|| StateError::RowNotFound {
                job_id: job_id.to_string(),
                key: key.to_string(),
            })
    }

    /// Whether row work for this job must stop.
    ///
    /// True for `PAUSED`, `CANCELLED` and `COMPLETED` jobs.
    pub async fn check_cancelled(&self, job_id: &str) -> Result<bool, StateError> {
        let status = self
            .store
            .get_job_status(job_id)
            .await?
            .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
        Ok(status.halts_work())
    }

    pub fn register_cancel_hook(&self, job_id: &str, hook: CancelHook) {
        self.hooks().insert(job_id.to_string(), hook);
    }

    pub fn unregister_cancel_hook(&self, job_id: &str) {
        self.hooks().remove(job_id);
    }

    fn hooks(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelHook>> {
        self.cancel_hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire_cancel_hook(&self, job_id: &str) {
        let hook = self.hooks().get(job_id).cloned();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), StateError> {
        self.fire_cancel_hook(job_id);
        self.set_status(job_id, JobStatus::Cancelled).await
    }

    pub async fn pause(&self, job_id: &str) -> Result<(), StateError> {
        self.fire_cancel_hook(job_id);
        self.set_status(job_id, JobStatus::Paused).await
    }

    pub async fn resume(&self, job_id: &str) -> Result<(), StateError> {
        self.set_status(job_id, JobStatus::Running).await
    }

    pub async fn complete(&self, job_id: &str) -> Result<(), StateError> {
        self.set_status(job_id, JobStatus::Completed).await
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<(), StateError> {
        self.store
            .set_job_status(job_id, status)
            .await
            .map_err(|e| map_missing_job(e, job_id))?;
        tracing::info!(job_id = %job_id, status = %status, "Job status changed");
        Ok(())
    }

    pub async fn progress(&self, job_id: &str) -> Result<JobProgress, StateError> {
        self.store
            .get_job_progress(job_id)
            .await?
            .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))
    }

    pub async fn rows_at_stage(
        &self,
        job_id: &str,
        stage: RowStage,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<RowState>, StateError> {
        Ok(self
            .store
            .get_rows_at_stage(job_id, stage, offset, limit)
            .await?)
    }

    /// Finished (`COMPLETED`) rows as public results.
    pub async fn results(
        &self,
        job_id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<EnrichmentResult>, StateError> {
        let rows = self
            .rows_at_stage(job_id, RowStage::Completed, offset, limit)
            .await?;
        Ok(rows.iter().map(EnrichmentResult::from).collect())
    }
}

fn map_missing_job(err: StoreError, job_id: &str) -> StateError {
    match err {
        StoreError::JobNotFound(_) => StateError::JobNotFound(job_id.to_string()),
        other => StateError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn running_job(keys: &[&str]) -> (StateManager, String) {
        let manager = StateManager::new(Arc::new(InMemoryStore::new()));
        let job = manager.create_job(keys.len()).await.expect("create job");
        manager
            .start_job(&job.id, keys.len())
            .await
            .expect("start job");
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        manager
            .initialize_job(&job.id, &keys)
            .await
            .expect("initialize");
        (manager, job.id)
    }

    #[tokio::test]
    async fn test_initialize_requires_running_job() {
        let manager = StateManager::new(Arc::new(InMemoryStore::new()));
        let err = manager
            .initialize_job("missing", &["a".to_string()])
            .await
            .expect_err("missing job");
        assert!(matches!(err, StateError::JobNotFound(_)));

        let job = manager.create_job(1).await.expect("create");
        let err = manager
            .initialize_job(&job.id, &["a".to_string()])
            .await
            .expect_err("pending job");
        assert!(matches!(
            err,
            StateError::JobNotRunning {
                status: JobStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_transition_applies_update() {
        let (manager, job_id) = running_job(&["acme"]).await;

        let serp = SerpData {
            queries: vec!["acme ceo".to_string()],
            results: vec![],
        };
        let row = manager
            .transition(
                &job_id,
                "acme",
                RowStage::SerpFetched,
                RowUpdate::new().with_serp(serp.clone()),
            )
            .await
            .expect("transition");
        assert_eq!(row.stage, RowStage::SerpFetched);
        assert_eq!(row.serp_data, Some(serp));

        let stored = manager.get_row(&job_id, "acme").await.expect("row");
        assert_eq!(stored.stage, RowStage::SerpFetched);
    }

    #[tokio::test]
    async fn test_error_forces_failed() {
        let (manager, job_id) = running_job(&["acme"]).await;
        let row = manager
            .transition(
                &job_id,
                "acme",
                RowStage::DecisionMade,
                RowUpdate::new().with_error("decision maker unavailable"),
            )
            .await
            .expect("transition");
        assert_eq!(row.stage, RowStage::Failed);
        assert_eq!(row.error.as_deref(), Some("decision maker unavailable"));
    }

    #[tokio::test]
    async fn test_transition_unknown_row() {
        let (manager, job_id) = running_job(&["acme"]).await;
        let err = manager
            .transition(&job_id, "ghost", RowStage::SerpFetched, RowUpdate::new())
            .await
            .expect_err("unknown row");
        assert!(matches!(err, StateError::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_transition_rejects_regression() {
        let (manager, job_id) = running_job(&["acme"]).await;
        manager
            .transition(&job_id, "acme", RowStage::Crawled, RowUpdate::new())
            .await
            .expect("forward");
        let err = manager
            .transition(&job_id, "acme", RowStage::SerpFetched, RowUpdate::new())
            .await
            .expect_err("regression");
        assert!(matches!(err, StateError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_back_to_pending_requires_retry_reset() {
        let (manager, job_id) = running_job(&["acme"]).await;
        manager
            .transition(
                &job_id,
                "acme",
                RowStage::Crawled,
                RowUpdate::new().with_crawl(CrawlResults::default()),
            )
            .await
            .expect("forward");

        let err = manager
            .transition(&job_id, "acme", RowStage::Pending, RowUpdate::new())
            .await
            .expect_err("plain regression");
        assert!(matches!(
            err,
            StateError::InvalidTransition {
                from: RowStage::Crawled,
                to: RowStage::Pending,
                ..
            }
        ));
        let stored = manager.get_row(&job_id, "acme").await.expect("row");
        assert_eq!(stored.stage, RowStage::Crawled);
        assert!(stored.crawl_results.is_some());

        let row = manager
            .transition(&job_id, "acme", RowStage::Pending, RowUpdate::new().reset_for_retry())
            .await
            .expect("retry reset");
        assert_eq!(row.stage, RowStage::Pending);
        assert!(row.crawl_results.is_none());
    }

    #[tokio::test]
    async fn test_transition_on_halted_job_cancels_row_idempotently() {
        for halt in [JobStatus::Paused, JobStatus::Cancelled, JobStatus::Completed] {
            let (manager, job_id) = running_job(&["a", "b"]).await;
            manager
                .transition(&job_id, "b", RowStage::Completed, RowUpdate::new())
                .await
                .expect("complete b");
            manager
                .store()
                .set_job_status(&job_id, halt)
                .await
                .expect("halt");

            for _ in 0..2 {
                let err = manager
                    .transition(&job_id, "a", RowStage::SerpFetched, RowUpdate::new())
                    .await
                    .expect_err("halted job");
                assert!(matches!(err, StateError::JobCancelled(_)));
                let row = manager.get_row(&job_id, "a").await.expect("row");
                assert_eq!(row.stage, RowStage::Cancelled);
            }

            let err = manager
                .transition(&job_id, "b", RowStage::Completed, RowUpdate::new())
                .await
                .expect_err("halted job");
            assert!(matches!(err, StateError::JobCancelled(_)));
            let row = manager.get_row(&job_id, "b").await.expect("row");
            assert_eq!(row.stage, RowStage::Completed);
        }
    }

    #[tokio::test]
    async fn test_check_cancelled_statuses() {
        let (manager, job_id) = running_job(&["a"]).await;
        assert!(!manager.check_cancelled(&job_id).await.expect("check"));

        manager.pause(&job_id).await.expect("pause");
        assert!(manager.check_cancelled(&job_id).await.expect("check"));

        manager.resume(&job_id).await.expect("resume");
        assert!(!manager.check_cancelled(&job_id).await.expect("check"));

        manager.complete(&job_id).await.expect("complete");
        assert!(manager.check_cancelled(&job_id).await.expect("check"));

        assert!(matches!(
            manager.check_cancelled("missing").await,
            Err(StateError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_fires_registered_hook() {
        let (manager, job_id) = running_job(&["a"]).await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        manager.register_cancel_hook(
            &job_id,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        manager.pause(&job_id).await.expect("pause");
        manager.cancel(&job_id).await.expect("cancel");
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        manager.unregister_cancel_hook(&job_id);
        manager.cancel(&job_id).await.expect("cancel again");
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        let progress = manager.progress(&job_id).await.expect("progress");
        assert_eq!(progress.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_results_lists_completed_rows() {
        let (manager, job_id) = running_job(&["a", "b"]).await;
        let mut data = BTreeMap::new();
        data.insert("ceo".to_string(), FieldValue::from("Jane"));
        let mut conf = BTreeMap::new();
        conf.insert("ceo".to_string(), FieldConfidence::new(0.9, "site"));
        manager
            .transition(
                &job_id,
                "a",
                RowStage::Completed,
                RowUpdate::new().with_extracted(data, conf),
            )
            .await
            .expect("complete a");

        let results = manager.results(&job_id, 0, None).await.expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "a");
        assert_eq!(results[0].extracted_data["ceo"], serde_json::json!("Jane"));
    }
}
