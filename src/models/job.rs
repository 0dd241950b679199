//! Job records and job-level progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::row::RowStage;

/// Lifecycle status of an enrichment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Cancelled,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Completed => "COMPLETED",
        }
    }

    /// Whether row work must stop for a job in this status.
    pub fn halts_work(&self) -> bool {
        matches!(
            self,
            JobStatus::Paused | JobStatus::Cancelled | JobStatus::Completed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "PAUSED" => Ok(JobStatus::Paused),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "COMPLETED" => Ok(JobStatus::Completed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// One enrichment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub total_rows: usize,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A new `PENDING` job with a random id.
    pub fn new(total_rows: usize) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), total_rows)
    }

    pub fn with_id(id: impl Into<String>, total_rows: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            total_rows,
            status: JobStatus::Pending,
            started_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregated progress for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub total_rows: usize,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub rows_by_stage: BTreeMap<RowStage, usize>,
}

impl JobProgress {
    /// Number of rows in a terminal stage.
    pub fn finished_rows(&self) -> usize {
        self.rows_by_stage
            .iter()
            .filter(|(stage, _)| stage.is_terminal())
            .map(|(_, count)| count)
            .sum()
    }
}
