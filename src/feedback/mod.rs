//! Cross-attempt memory for the retry loop.
//!
//! An [`AttemptHistory`] records what each pass of a row tried and how well
//! it scored. [`EnrichmentFeedback`] is what the next pass receives.

mod history;
mod types;

pub use history::{Attempt, AttemptHistory, AttemptStore, InMemoryAttemptStore, PartialResult};
pub use types::{AttemptSummary, EnrichmentFeedback, QualityAssessment, WeakColumn};
