//! In-process [`Store`] backed by `RwLock`-guarded maps.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::store::{check_unique_keys, Store};
use crate::error::StoreError;
use crate::models::{Job, JobProgress, JobStatus, RowStage, RowState};

#[derive(Debug)]
struct JobEntry {
    job: Job,
    /// Rows in creation order.
    rows: Vec<RowState>,
    index: HashMap<String, usize>,
}

/// A [`Store`] that keeps everything in memory.
///
/// Suitable for tests and single-process runs where durability across
/// restarts is not needed.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn job_not_found(job_id: &str) -> StoreError {
    StoreError::JobNotFound(job_id.to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateJob(job.id.clone()));
        }
        jobs.insert(
            job.id.clone(),
            JobEntry {
                job: job.clone(),
                rows: Vec::new(),
                index: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).map(|e| e.job.clone()))
    }

    async fn start_job(&self, job_id: &str, total_rows: usize) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id).ok_or_else(|| job_not_found(job_id))?;
        let now = Utc::now();
        entry.job.status = JobStatus::Running;
        entry.job.total_rows = total_rows;
        entry.job.started_at = Some(now);
        entry.job.updated_at = now;
        Ok(())
    }

    async fn bulk_create_rows(&self, job_id: &str, keys: &[String]) -> Result<(), StoreError> {
        check_unique_keys(job_id, keys)?;

        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id).ok_or_else(|| job_not_found(job_id))?;
        if let Some(existing) = keys.iter().find(|k| entry.index.contains_key(*k)) {
            return Err(StoreError::DuplicateRow {
                job_id: job_id.to_string(),
                key: existing.clone(),
            });
        }

        for key in keys {
            entry.index.insert(key.clone(), entry.rows.len());
            entry.rows.push(RowState::new(key.clone()));
        }
        Ok(())
    }

    async fn save_row_state(&self, job_id: &str, row: &RowState) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id).ok_or_else(|| job_not_found(job_id))?;
        let idx = *entry
            .index
            .get(&row.key)
            .ok_or_else(|| StoreError::RowNotFound {
                job_id: job_id.to_string(),
                key: row.key.clone(),
            })?;
        entry.rows[idx] = row.clone();
        Ok(())
    }

    async fn get_row_state(
        &self,
        job_id: &str,
        key: &str,
    ) -> Result<Option<RowState>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(job_id)
            .and_then(|e| e.index.get(key).map(|&idx| e.rows[idx].clone())))
    }

    async fn get_rows_at_stage(
        &self,
        job_id: &str,
        stage: RowStage,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<RowState>, StoreError> {
        let jobs = self.jobs.read().await;
        let Some(entry) = jobs.get(job_id) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .rows
            .iter()
            .filter(|r| r.stage == stage)
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id).ok_or_else(|| job_not_found(job_id))?;
        entry.job.status = status;
        entry.job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).map(|e| e.job.status))
    }

    async fn get_job_progress(&self, job_id: &str) -> Result<Option<JobProgress>, StoreError> {
        let jobs = self.jobs.read().await;
        let Some(entry) = jobs.get(job_id) else {
            return Ok(None);
        };

        let mut rows_by_stage = BTreeMap::new();
        for row in &entry.rows {
            *rows_by_stage.entry(row.stage).or_insert(0) += 1;
        }

        Ok(Some(JobProgress {
            job_id: job_id.to_string(),
            total_rows: entry.job.total_rows,
            status: entry.job.status,
            started_at: entry.job.started_at,
            rows_by_stage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn store_with_job(id: &str) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_job(&Job::with_id(id, 0))
            .await
            .expect("create job");
        store
    }

    #[tokio::test]
    async fn test_create_and_start_job() {
        let store = store_with_job("job-1").await;
        assert!(matches!(
            store.create_job(&Job::with_id("job-1", 0)).await,
            Err(StoreError::DuplicateJob(_))
        ));

        store.start_job("job-1", 3).await.expect("start");
        let job = store.get_job("job-1").await.expect("get").expect("exists");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total_rows, 3);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn test_bulk_create_is_all_or_nothing() {
        let store = store_with_job("job-1").await;
        store
            .bulk_create_rows("job-1", &keys(&["a", "b"]))
            .await
            .expect("first batch");

        let err = store
            .bulk_create_rows("job-1", &keys(&["c", "a"]))
            .await
            .expect_err("overlapping batch");
        assert!(matches!(err, StoreError::DuplicateRow { ref key, .. } if key == "a"));
        assert!(store
            .get_row_state("job-1", "c")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn test_rows_at_stage_pagination_and_progress() {
        let store = store_with_job("job-1").await;
        store.start_job("job-1", 4).await.expect("start");
        store
            .bulk_create_rows("job-1", &keys(&["a", "b", "c", "d"]))
            .await
            .expect("rows");

        let mut row = store
            .get_row_state("job-1", "b")
            .await
            .expect("get")
            .expect("exists");
        row.stage = RowStage::Completed;
        store.save_row_state("job-1", &row).await.expect("save");

        let pending = store
            .get_rows_at_stage("job-1", RowStage::Pending, 1, Some(1))
            .await
            .expect("rows");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "c");

        let progress = store
            .get_job_progress("job-1")
            .await
            .expect("progress")
            .expect("exists");
        assert_eq!(progress.rows_by_stage[&RowStage::Pending], 3);
        assert_eq!(progress.rows_by_stage[&RowStage::Completed], 1);
        assert_eq!(progress.total_rows, 4);
    }

    #[tokio::test]
    async fn test_save_unknown_row_fails() {
        let store = store_with_job("job-1").await;
        let err = store
            .save_row_state("job-1", &RowState::new("ghost"))
            .await
            .expect_err("unknown row");
        assert!(matches!(err, StoreError::RowNotFound { .. }));
    }
}
