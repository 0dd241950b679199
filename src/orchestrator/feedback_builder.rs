//! Builds the feedback attached to a row's next attempt.

use crate::feedback::{AttemptHistory, AttemptSummary, EnrichmentFeedback, WeakColumn};

/// Turns a row's attempt history into feedback for the next attempt.
pub trait FeedbackBuilder: Send + Sync {
    fn build(&self, history: Option<&AttemptHistory>, weak_columns: &[WeakColumn])
        -> EnrichmentFeedback;
}

/// Rule-based feedback: focus on the weak columns, avoid everything tried
/// so far, and add hints from simple presence checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFeedbackBuilder;

impl DefaultFeedbackBuilder {
    pub fn new() -> Self {
        Self
    }

    fn hints(&self, history: &AttemptHistory, weak_columns: &[WeakColumn]) -> Vec<String> {
        let mut hints = Vec::new();

        if !weak_columns.is_empty() {
            let names: Vec<&str> = weak_columns.iter().map(|wc| wc.name.as_str()).collect();
            hints.push(format!(
                "Focus specifically on finding data for: {}",
                names.join(", ")
            ));
        }

        if !history.all_patterns_used().is_empty() {
            hints.push(
                "Previous search patterns did not yield sufficient results. Try different keyword combinations."
                    .to_string(),
            );
        }

        if !history.all_urls_crawled().is_empty() {
            hints.push(
                "Previously crawled URLs did not contain the needed information. Look for alternative sources."
                    .to_string(),
            );
        }

        hints
    }
}

impl FeedbackBuilder for DefaultFeedbackBuilder {
    fn build(
        &self,
        history: Option<&AttemptHistory>,
        weak_columns: &[WeakColumn],
    ) -> EnrichmentFeedback {
        let Some(history) = history.filter(|h| h.count() > 0) else {
            return EnrichmentFeedback::first_attempt();
        };

        let previous_attempts = history
            .attempts
            .iter()
            .map(|attempt| AttemptSummary {
                number: attempt.number,
                patterns: attempt.patterns_used.clone(),
                urls_crawled: attempt.urls_crawled.clone(),
                weak_columns: attempt
                    .assessment
                    .as_ref()
                    .map(|a| a.weak_columns.clone())
                    .unwrap_or_default(),
            })
            .collect();

        EnrichmentFeedback {
            attempt_number: history.count() as u32 + 1,
            focus_columns: weak_columns.iter().map(|wc| wc.name.clone()).collect(),
            avoid_patterns: history.all_patterns_used(),
            avoid_urls: history.all_urls_crawled(),
            previous_attempts,
            hints: self.hints(history, weak_columns),
        }
    }
}
