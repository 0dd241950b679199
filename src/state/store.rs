//! Persistence contract for jobs and row states.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Job, JobProgress, JobStatus, RowStage, RowState};

/// Durable keeper of job and row-state records.
///
/// Only the [`StateManager`](super::StateManager) writes through a store
/// during a run; readers (progress, results) may share it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new job record. Fails with `DuplicateJob` if the id exists.
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Mark a job `RUNNING`, record its row count and stamp `started_at`.
    async fn start_job(&self, job_id: &str, total_rows: usize) -> Result<(), StoreError>;

    /// Create one `PENDING` row per key.
    ///
    /// All-or-nothing: a key that is duplicated in `keys` or already stored
    /// rejects the whole batch and nothing is written.
    async fn bulk_create_rows(&self, job_id: &str, keys: &[String]) -> Result<(), StoreError>;

    /// Overwrite an existing row. Fails with `RowNotFound` if it was never created.
    async fn save_row_state(&self, job_id: &str, row: &RowState) -> Result<(), StoreError>;

    async fn get_row_state(&self, job_id: &str, key: &str)
        -> Result<Option<RowState>, StoreError>;

    /// Rows currently at `stage`, in creation order. `limit = None` returns all.
    async fn get_rows_at_stage(
        &self,
        job_id: &str,
        stage: RowStage,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<RowState>, StoreError>;

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError>;

    async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError>;

    /// Row counts per stage plus job status, or `None` for an unknown job.
    async fn get_job_progress(&self, job_id: &str) -> Result<Option<JobProgress>, StoreError>;
}

/// Reject batches that repeat a key.
pub(crate) fn check_unique_keys(job_id: &str, keys: &[String]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key.as_str()) {
            return Err(StoreError::DuplicateRow {
                job_id: job_id.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn Store) {}

    #[test]
    fn test_check_unique_keys() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert!(check_unique_keys("job", &keys).is_ok());

        let keys = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let err = check_unique_keys("job", &keys).expect_err("duplicate must fail");
        assert!(matches!(err, StoreError::DuplicateRow { key, .. } if key == "a"));
    }
}
