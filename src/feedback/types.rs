//! Quality assessments and the feedback handed to retry attempts.

use serde::{Deserialize, Serialize};

/// A target column whose confidence fell below the passing threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakColumn {
    pub name: String,
    pub confidence: f64,
    pub reason: String,
}

impl WeakColumn {
    pub fn new(name: impl Into<String>, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confidence,
            reason: reason.into(),
        }
    }
}

/// Outcome of evaluating one attempt's result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub passed: bool,
    pub weak_columns: Vec<WeakColumn>,
    pub suggestions: Vec<String>,
}

impl QualityAssessment {
    /// A failed assessment carrying only a suggestion.
    pub fn failed(suggestion: impl Into<String>) -> Self {
        Self {
            passed: false,
            weak_columns: Vec::new(),
            suggestions: vec![suggestion.into()],
        }
    }

    pub fn has_weak_columns(&self) -> bool {
        !self.weak_columns.is_empty()
    }

    pub fn weak_column_names(&self) -> Vec<String> {
        self.weak_columns.iter().map(|wc| wc.name.clone()).collect()
    }
}

/// Summary of one earlier attempt, included in retry feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub number: u32,
    pub patterns: Vec<String>,
    pub urls_crawled: Vec<String>,
    pub weak_columns: Vec<WeakColumn>,
}

/// Structured hints steering the next attempt for a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentFeedback {
    pub attempt_number: u32,
    pub focus_columns: Vec<String>,
    pub avoid_patterns: Vec<String>,
    pub avoid_urls: Vec<String>,
    pub previous_attempts: Vec<AttemptSummary>,
    pub hints: Vec<String>,
}

impl Default for EnrichmentFeedback {
    fn default() -> Self {
        Self::first_attempt()
    }
}

impl EnrichmentFeedback {
    /// Feedback for a row's first attempt: nothing but the attempt number.
    pub fn first_attempt() -> Self {
        Self {
            attempt_number: 1,
            focus_columns: Vec::new(),
            avoid_patterns: Vec::new(),
            avoid_urls: Vec::new(),
            previous_attempts: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt_number > 1
    }

    /// Render the feedback as a context block for prompt-driven
    /// capabilities. Empty for first attempts.
    pub fn to_prompt_context(&self) -> String {
        if !self.is_retry() {
            return String::new();
        }

        let mut out = format!("[CONTEXT: RETRY ATTEMPT {}]\n\n", self.attempt_number);

        if !self.previous_attempts.is_empty() {
            out.push_str("PREVIOUS ATTEMPTS:\n");
            for attempt in &self.previous_attempts {
                out.push_str(&format!("- Attempt {}:\n", attempt.number));
                if !attempt.patterns.is_empty() {
                    out.push_str(&format!("  Patterns: {}\n", attempt.patterns.join(" | ")));
                }
                if !attempt.weak_columns.is_empty() {
                    let weak: Vec<String> = attempt
                        .weak_columns
                        .iter()
                        .map(|wc| format!("{} ({:.2})", wc.name, wc.confidence))
                        .collect();
                    out.push_str(&format!("  Low confidence columns: {}\n", weak.join(", ")));
                }
            }
            out.push('\n');
        }

        if !self.focus_columns.is_empty() {
            out.push_str(&format!(
                "FOCUS ON THESE COLUMNS: {}\n",
                self.focus_columns.join(", ")
            ));
        }

        if !self.avoid_patterns.is_empty() {
            out.push_str(&format!(
                "AVOID SIMILAR PATTERNS TO: {}\n",
                self.avoid_patterns.join(" | ")
            ));
        }

        if !self.hints.is_empty() {
            out.push_str("\nHINTS:\n");
            for hint in &self.hints {
                out.push_str(&format!("- {}\n", hint));
            }
        }

        out
    }
}
