//! Data model for enrichment jobs.
//!
//! - [`Job`] and [`JobStatus`]: one enrichment request and its lifecycle
//! - [`RowState`] and [`RowStage`]: per-row progress through the pipeline
//! - [`ColumnMetadata`]: the schema being enriched
//! - [`FieldValue`] and [`FieldConfidence`]: typed extracted values
//! - [`SearchResults`], [`Decision`], [`CrawlResults`]: stage payloads

pub mod coerce;
mod column;
mod job;
mod row;
mod search;
mod value;

pub use coerce::{coerce_row, coerce_value};
pub use column::{ColumnMetadata, ColumnType};
pub use job::{Job, JobProgress, JobStatus};
pub use row::{EnrichmentResult, RowStage, RowState};
pub use search::{
    CrawlResults, Decision, KnowledgeGraph, OrganicResult, PeopleAlsoAsk, SearchResults, SerpData,
};
pub use value::{FieldConfidence, FieldValue};
