//! enrich-forge: row enrichment engine.
//!
//! Rows of a table are enriched with new columns by a staged concurrent
//! pipeline (pattern, SERP, decision, crawl, extract). A retry orchestrator
//! evaluates each row's result and re-runs weak rows with feedback from
//! their earlier attempts. Job and row state live behind a [`state::Store`].

pub mod cli;
pub mod error;
pub mod feedback;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use error::{
    CapabilityError, ConfigError, PipelineError, StageError, StateError, StoreError,
};
pub use models::{ColumnMetadata, ColumnType, EnrichmentResult, FieldConfidence, FieldValue};
pub use orchestrator::{Enricher, EnrichmentBuilder, RetryPolicyConfig, RunSummary};
pub use pipeline::{PipelineConfig, RunContext};
pub use state::{InMemoryStore, SqliteStore, StateManager};
