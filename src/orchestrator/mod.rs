//! Retry orchestration on top of the pipeline.
//!
//! After each attempt, a [`QualityEvaluator`] scores every row, a
//! [`RetryPolicy`] decides whether weak rows go again, and a
//! [`FeedbackBuilder`] tells the next attempt what to focus on and what to
//! avoid. [`EnrichmentBuilder`] wires a full [`Enricher`] from capability
//! implementations.

mod builder;
mod evaluator;
mod feedback_builder;
mod policy;
mod retry;

pub use builder::{Enricher, EnrichmentBuilder};
pub use evaluator::{ColumnTargetedEvaluator, DefaultQualityEvaluator, QualityEvaluator};
pub use feedback_builder::{DefaultFeedbackBuilder, FeedbackBuilder};
pub use policy::{
    AlwaysRetryPolicy, DefaultRetryPolicy, NeverRetryPolicy, RetryPolicy, RetryPolicyConfig,
};
pub use retry::{RetryOrchestrator, RunSummary};
