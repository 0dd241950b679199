//! SQLite-backed [`Store`] using sqlx.
//!
//! Stage payloads, extracted data and confidences are stored as JSON text
//! columns. Row keys are unique per job, so a bulk insert either lands in
//! full or rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::store::{check_unique_keys, Store};
use crate::error::StoreError;
use crate::models::{Job, JobProgress, JobStatus, RowStage, RowState};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT    PRIMARY KEY,
    total_rows      INTEGER NOT NULL DEFAULT 0,
    status          TEXT    NOT NULL,
    started_at      TEXT,
    created_at      TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS row_states (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id          TEXT    NOT NULL REFERENCES jobs(id),
    key             TEXT    NOT NULL,
    stage           TEXT    NOT NULL,
    extracted_data  TEXT    NOT NULL DEFAULT '{}',
    confidence      TEXT    NOT NULL DEFAULT '{}',
    sources         TEXT    NOT NULL DEFAULT '[]',
    error           TEXT,
    serp_data       TEXT,
    decision        TEXT,
    crawl_results   TEXT,
    created_at      TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL,

    UNIQUE (job_id, key)
);

CREATE INDEX IF NOT EXISTS idx_row_states_stage ON row_states(job_id, stage);
"#;

/// A [`Store`] persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = path, "State store opened");
        Ok(store)
    }

    /// A private in-memory database. Limited to one connection so every
    /// query sees the same database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Job {
        id: row.try_get("id")?,
        total_rows: row.try_get::<i64, _>("total_rows")? as usize,
        status: JobStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        started_at: started_at.as_deref().map(parse_time).transpose()?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<T>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
        .transpose()
}

fn row_state_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RowState, StoreError> {
    let stage: String = row.try_get("stage")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(RowState {
        key: row.try_get("key")?,
        stage: RowStage::from_str(&stage).map_err(StoreError::Corrupt)?,
        extracted_data: json_column(row, "extracted_data")?.unwrap_or_default(),
        confidence: json_column(row, "confidence")?.unwrap_or_default(),
        sources: json_column(row, "sources")?.unwrap_or_default(),
        error: row.try_get("error")?,
        serp_data: json_column(row, "serp_data")?,
        decision: json_column(row, "decision")?,
        crawl_results: json_column(row, "crawl_results")?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn to_json_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(StoreError::from))
        .transpose()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, total_rows, status, started_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&job.id)
        .bind(job.total_rows as i64)
        .bind(job.status.as_str())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateJob(job.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn start_job(&self, job_id: &str, total_rows: usize) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET status = ?1, total_rows = ?2, started_at = ?3, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(JobStatus::Running.as_str())
        .bind(total_rows as i64)
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn bulk_create_rows(&self, job_id: &str, keys: &[String]) -> Result<(), StoreError> {
        check_unique_keys(job_id, keys)?;

        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        for key in keys {
            let result = sqlx::query(
                "INSERT INTO row_states (job_id, key, stage, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
            )
            .bind(job_id)
            .bind(key)
            .bind(RowStage::Pending.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateRow {
                        job_id: job_id.to_string(),
                        key: key.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_row_state(&self, job_id: &str, row: &RowState) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE row_states SET
                stage = ?1, extracted_data = ?2, confidence = ?3, sources = ?4, error = ?5,
                serp_data = ?6, decision = ?7, crawl_results = ?8, updated_at = ?9
             WHERE job_id = ?10 AND key = ?11",
        )
        .bind(row.stage.as_str())
        .bind(serde_json::to_string(&row.extracted_data)?)
        .bind(serde_json::to_string(&row.confidence)?)
        .bind(serde_json::to_string(&row.sources)?)
        .bind(&row.error)
        .bind(to_json_opt(&row.serp_data)?)
        .bind(to_json_opt(&row.decision)?)
        .bind(to_json_opt(&row.crawl_results)?)
        .bind(row.updated_at.to_rfc3339())
        .bind(job_id)
        .bind(&row.key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                job_id: job_id.to_string(),
                key: row.key.clone(),
            });
        }
        Ok(())
    }

    async fn get_row_state(
        &self,
        job_id: &str,
        key: &str,
    ) -> Result<Option<RowState>, StoreError> {
        let row = sqlx::query("SELECT * FROM row_states WHERE job_id = ?1 AND key = ?2")
            .bind(job_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_state_from_row).transpose()
    }

    async fn get_rows_at_stage(
        &self,
        job_id: &str,
        stage: RowStage,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<RowState>, StoreError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT * FROM row_states WHERE job_id = ?1 AND stage = ?2
             ORDER BY seq LIMIT ?3 OFFSET ?4",
        )
        .bind(job_id)
        .bind(stage.as_str())
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_state_from_row).collect()
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        status
            .map(|s| JobStatus::from_str(&s).map_err(StoreError::Corrupt))
            .transpose()
    }

    async fn get_job_progress(&self, job_id: &str) -> Result<Option<JobProgress>, StoreError> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(None);
        };

        let counts = sqlx::query(
            "SELECT stage, COUNT(*) AS count FROM row_states WHERE job_id = ?1 GROUP BY stage",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let mut rows_by_stage = BTreeMap::new();
        for row in &counts {
            let stage: String = row.try_get("stage")?;
            let count: i64 = row.try_get("count")?;
            rows_by_stage.insert(
                RowStage::from_str(&stage).map_err(StoreError::Corrupt)?,
                count as usize,
            );
        }

        Ok(Some(JobProgress {
            job_id: job.id,
            total_rows: job.total_rows,
            status: job.status,
            started_at: job.started_at,
            rows_by_stage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldConfidence, FieldValue, SerpData};

    async fn store_with_rows(keys: &[&str]) -> SqliteStore {
        let store = SqliteStore::in_memory().await.expect("open store");
        store
            .create_job(&Job::with_id("job-1", 0))
            .await
            .expect("create job");
        store
            .start_job("job-1", keys.len())
            .await
            .expect("start job");
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        store
            .bulk_create_rows("job-1", &keys)
            .await
            .expect("create rows");
        store
    }

    #[tokio::test]
    async fn test_job_round_trip() {
        let store = store_with_rows(&[]).await;
        let job = store.get_job("job-1").await.expect("get").expect("exists");
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(store.get_job("missing").await.expect("get").is_none());

        store
            .set_job_status("job-1", JobStatus::Paused)
            .await
            .expect("set");
        assert_eq!(
            store.get_job_status("job-1").await.expect("status"),
            Some(JobStatus::Paused)
        );
        assert!(matches!(
            store.set_job_status("missing", JobStatus::Paused).await,
            Err(StoreError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        let path = path.to_str().expect("utf-8 path");

        let store = SqliteStore::open(path).await.expect("open");
        store
            .create_job(&Job::with_id("job-1", 2))
            .await
            .expect("create job");
        store.start_job("job-1", 2).await.expect("start job");
        store
            .bulk_create_rows("job-1", &["acme".to_string(), "globex".to_string()])
            .await
            .expect("create rows");
        drop(store);

        let reopened = SqliteStore::open(path).await.expect("reopen");
        let progress = reopened
            .get_job_progress("job-1")
            .await
            .expect("progress")
            .expect("job exists");
        assert_eq!(progress.status, JobStatus::Running);
        assert_eq!(progress.rows_by_stage[&RowStage::Pending], 2);
    }

    #[tokio::test]
    async fn test_row_state_persists_payloads() {
        let store = store_with_rows(&["acme"]).await;

        let mut row = store
            .get_row_state("job-1", "acme")
            .await
            .expect("get")
            .expect("exists");
        row.stage = RowStage::SerpFetched;
        row.serp_data = Some(SerpData {
            queries: vec!["acme ceo".to_string()],
            results: vec![],
        });
        row.extracted_data
            .insert("ceo".to_string(), FieldValue::from("Jane Doe"));
        row.confidence
            .insert("ceo".to_string(), FieldConfidence::new(0.9, "homepage"));
        store.save_row_state("job-1", &row).await.expect("save");

        let loaded = store
            .get_row_state("job-1", "acme")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.stage, RowStage::SerpFetched);
        assert_eq!(loaded.serp_data, row.serp_data);
        assert_eq!(loaded.extracted_data, row.extracted_data);
        assert_eq!(loaded.confidence["ceo"].score, 0.9);
    }

    #[tokio::test]
    async fn test_bulk_create_rolls_back_on_duplicate() {
        let store = store_with_rows(&["a"]).await;
        let err = store
            .bulk_create_rows("job-1", &["b".to_string(), "a".to_string()])
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateRow { .. }));
        assert!(store.get_row_state("job-1", "b").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_progress_groups_by_stage() {
        let store = store_with_rows(&["a", "b", "c"]).await;
        let mut row = store
            .get_row_state("job-1", "b")
            .await
            .expect("get")
            .expect("exists");
        row.stage = RowStage::Failed;
        row.error = Some("boom".to_string());
        store.save_row_state("job-1", &row).await.expect("save");

        let progress = store
            .get_job_progress("job-1")
            .await
            .expect("progress")
            .expect("exists");
        assert_eq!(progress.total_rows, 3);
        assert_eq!(progress.rows_by_stage[&RowStage::Pending], 2);
        assert_eq!(progress.rows_by_stage[&RowStage::Failed], 1);

        let pending = store
            .get_rows_at_stage("job-1", RowStage::Pending, 0, None)
            .await
            .expect("rows");
        let keys: Vec<_> = pending.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
