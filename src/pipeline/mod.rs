//! Concurrent staged pipeline for row enrichment.
//!
//! Rows move through an ordered list of [`Stage`]s over bounded queues, with
//! one worker pool per stage. Backpressure from a full queue is the only
//! flow control. Rows finish in no particular order, so everything is
//! correlated by row key.
//!
//! # Example
//!
//! ```rust,ignore
//! use enrich_forge::pipeline::{Capabilities, Pipeline, PipelineConfig, RunContext};
//!
//! let pipeline = Pipeline::standard(state.clone(), PipelineConfig::from_env()?, capabilities);
//! let summary = pipeline.run(&RunContext::new(), &job_id, &row_keys, columns).await?;
//! println!("{} completed, {} failed", summary.completed, summary.failed);
//! ```
//!
//! Retries are not handled here; see [`crate::orchestrator`], which calls
//! [`Pipeline::execute`] once per attempt.

mod config;
mod engine;
mod events;
mod message;
mod progress;
mod stage;
pub(crate) mod stages;

pub use config::{
    PipelineConfig, StageWorkers, DEFAULT_CHANNEL_BUFFER_SIZE, DEFAULT_MAX_URLS,
    DEFAULT_WORKERS_PER_STAGE,
};
pub(crate) use config::{parse_env_bool, parse_env_value};
pub use engine::{Pipeline, PipelineSummary};
pub use events::{row_event, RowOutcome};
pub use message::{Message, RunContext};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot, StageCounters, StageSnapshot};
pub use stage::Stage;
pub use stages::{
    Capabilities, CrawlStage, DecisionStage, ExtractStage, PatternStage, SerpStage,
};
