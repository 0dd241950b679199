//! Error types for enrich-forge operations.
//!
//! Defines error types for the major subsystems:
//! - State store persistence
//! - Job and row lifecycle management
//! - External capability calls (search, decide, crawl, extract, patterns)
//! - Per-row stage failures carried on pipeline messages
//! - Pipeline and orchestrator setup

use thiserror::Error;

use crate::models::{JobStatus, RowStage};

/// Errors raised by a [`Store`](crate::state::Store) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job '{0}' not found in store")]
    JobNotFound(String),

    #[error("Row '{key}' not found for job '{job_id}'")]
    RowNotFound { job_id: String, key: String },

    #[error("Job '{0}' already exists")]
    DuplicateJob(String),

    #[error("Row '{key}' already exists for job '{job_id}'")]
    DuplicateRow { job_id: String, key: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors returned by the [`StateManager`](crate::state::StateManager).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{job_id}' is not running (status: {status})")]
    JobNotRunning { job_id: String, status: JobStatus },

    #[error("Row '{key}' not found for job '{job_id}'")]
    RowNotFound { job_id: String, key: String },

    #[error("Job '{0}' was cancelled")]
    JobCancelled(String),

    #[error("Row '{key}' cannot move from {from} to {to}")]
    InvalidTransition {
        key: String,
        from: RowStage,
        to: RowStage,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by external capabilities (searcher, decision maker,
/// crawler, extractor, pattern generator).
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

/// A per-row failure recorded on a pipeline message.
///
/// Cloneable so it can ride along on the message and be copied into the
/// attempt history.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("{stage}: missing {field}")]
    MissingInput {
        stage: &'static str,
        field: &'static str,
    },

    #[error("{capability} failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },

    #[error("no query patterns available")]
    NoQueries,

    #[error("state transition failed: {0}")]
    State(String),
}

/// Errors raised while setting up or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline has no stages")]
    NoStages,

    #[error("Missing capability: {0}")]
    MissingCapability(&'static str),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}
