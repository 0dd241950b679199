//! Query pattern helpers: placeholder substitution, validation and the
//! deterministic fallback generator.

use async_trait::async_trait;
use std::sync::Arc;

use super::capabilities::QueryPatternGenerator;
use crate::error::CapabilityError;
use crate::feedback::EnrichmentFeedback;
use crate::models::ColumnMetadata;

/// Placeholder replaced by the row key when building queries.
pub const ENTITY_PLACEHOLDER: &str = "%entity";

pub const MAX_PATTERNS: usize = 5;
pub const MAX_PATTERN_CHARS: usize = 150;

/// Suffixes tried in order when a retry must avoid earlier patterns.
const RETRY_VARIANTS: &[&str] = &["", " official site", " latest information", " profile overview"];

/// Turns patterns into concrete search queries for one entity.
#[derive(Debug, Clone)]
pub struct PatternQueryBuilder {
    patterns: Vec<String>,
}

impl PatternQueryBuilder {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// One query per pattern, with every `%entity` replaced by `entity`.
    pub fn build(&self, entity: &str) -> Vec<String> {
        self.patterns
            .iter()
            .map(|p| p.replace(ENTITY_PLACEHOLDER, entity))
            .collect()
    }
}

/// Check that a generator's output is usable: 1 to 5 patterns of at most
/// 150 characters each.
pub fn validate_patterns(patterns: &[String]) -> Result<(), CapabilityError> {
    if patterns.is_empty() || patterns.len() > MAX_PATTERNS {
        return Err(CapabilityError::InvalidResponse(format!(
            "invalid number of patterns: {} (expected 1-{})",
            patterns.len(),
            MAX_PATTERNS
        )));
    }
    if let Some(long) = patterns
        .iter()
        .find(|p| p.chars().count() > MAX_PATTERN_CHARS)
    {
        return Err(CapabilityError::InvalidResponse(format!(
            "pattern too long: {} chars (max {})",
            long.chars().count(),
            MAX_PATTERN_CHARS
        )));
    }
    Ok(())
}

/// Deterministic generator: `"%entity col1 col2 ..."`.
///
/// On a retry the pattern names only the focus columns and picks the first
/// variant that is not in the feedback's avoid list.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackPatternGenerator;

impl FallbackPatternGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn patterns_for(
        &self,
        columns: &[ColumnMetadata],
        feedback: Option<&EnrichmentFeedback>,
    ) -> Vec<String> {
        let retry = feedback.filter(|fb| fb.is_retry());
        let names: Vec<&str> = match retry {
            Some(fb) if !fb.focus_columns.is_empty() => {
                fb.focus_columns.iter().map(String::as_str).collect()
            }
            _ => columns.iter().map(|c| c.name.as_str()).collect(),
        };

        let mut base = ENTITY_PLACEHOLDER.to_string();
        for name in names {
            if base.chars().count() + name.chars().count() + 1 > MAX_PATTERN_CHARS {
                break;
            }
            base.push(' ');
            base.push_str(name);
        }

        let Some(fb) = retry else {
            return vec![base];
        };

        let chosen = RETRY_VARIANTS
            .iter()
            .map(|suffix| format!("{}{}", base, suffix))
            .filter(|p| p.chars().count() <= MAX_PATTERN_CHARS)
            .find(|p| !fb.avoid_patterns.contains(p))
            .unwrap_or(base);
        vec![chosen]
    }
}

#[async_trait]
impl QueryPatternGenerator for FallbackPatternGenerator {
    async fn generate_patterns(
        &self,
        columns: &[ColumnMetadata],
        feedback: Option<&EnrichmentFeedback>,
    ) -> Result<Vec<String>, CapabilityError> {
        Ok(self.patterns_for(columns, feedback))
    }
}

/// Wraps a generator so failed or invalid output falls back to
/// [`FallbackPatternGenerator`] instead of failing the row.
pub struct ValidatedPatternGenerator {
    inner: Arc<dyn QueryPatternGenerator>,
    fallback: FallbackPatternGenerator,
}

impl ValidatedPatternGenerator {
    pub fn new(inner: Arc<dyn QueryPatternGenerator>) -> Self {
        Self {
            inner,
            fallback: FallbackPatternGenerator,
        }
    }
}

#[async_trait]
impl QueryPatternGenerator for ValidatedPatternGenerator {
    async fn generate_patterns(
        &self,
        columns: &[ColumnMetadata],
        feedback: Option<&EnrichmentFeedback>,
    ) -> Result<Vec<String>, CapabilityError> {
        let outcome = self
            .inner
            .generate_patterns(columns, feedback)
            .await
            .and_then(|patterns| validate_patterns(&patterns).map(|_| patterns));

        match outcome {
            Ok(patterns) => Ok(patterns),
            Err(e) => {
                tracing::warn!(error = %e, "Pattern generation failed, using fallback patterns");
                Ok(self.fallback.patterns_for(columns, feedback))
            }
        }
    }
}
