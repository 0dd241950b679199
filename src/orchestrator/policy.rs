//! Retry policies: whether a row that failed evaluation gets another
//! attempt.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::feedback::QualityAssessment;
use crate::pipeline::{parse_env_bool, parse_env_value};

/// Decides whether a row gets another attempt.
///
/// Policies may remember earlier assessments, so the orchestrator keeps
/// one instance per row, created with [`RetryPolicy::fresh`].
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the number of attempts already made (1 after the
    /// first pass).
    fn should_retry(&mut self, attempt: u32, assessment: Option<&QualityAssessment>) -> bool;

    fn max_attempts(&self) -> u32;

    fn confidence_threshold(&self) -> f64;

    /// A new instance with the same configuration and no remembered state.
    fn fresh(&self) -> Box<dyn RetryPolicy>;
}

/// Settings for [`DefaultRetryPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicyConfig {
    /// Total attempts allowed per row, the first included.
    pub max_retries: u32,
    /// Confidence a column needs to pass.
    pub threshold: f64,
    /// Refuse a retry when the previous one improved nothing.
    pub require_improvement: bool,
    /// Fewer weak columns than this is not worth a retry.
    pub min_weak_columns: usize,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            threshold: 0.6,
            require_improvement: true,
            min_weak_columns: 1,
        }
    }
}

impl RetryPolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ENRICH_MAX_RETRIES`: Attempts per row (default: 3)
    /// - `ENRICH_CONFIDENCE_THRESHOLD`: Passing confidence (default: 0.6)
    /// - `ENRICH_REQUIRE_IMPROVEMENT`: Stop on stagnant retries (default: true)
    /// - `ENRICH_MIN_WEAK_COLUMNS`: Weak columns needed to retry (default: 1)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENRICH_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "ENRICH_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("ENRICH_CONFIDENCE_THRESHOLD") {
            config.threshold = parse_env_value(&val, "ENRICH_CONFIDENCE_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("ENRICH_REQUIRE_IMPROVEMENT") {
            config.require_improvement = parse_env_bool(&val, "ENRICH_REQUIRE_IMPROVEMENT")?;
        }

        if let Ok(val) = std::env::var("ENRICH_MIN_WEAK_COLUMNS") {
            config.min_weak_columns = parse_env_value(&val, "ENRICH_MIN_WEAK_COLUMNS")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }

        Ok(())
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_require_improvement(mut self, required: bool) -> Self {
        self.require_improvement = required;
        self
    }

    pub fn with_min_weak_columns(mut self, min: usize) -> Self {
        self.min_weak_columns = min;
        self
    }
}

/// Retries weak rows until they pass, run out of attempts, or stop
/// improving.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    config: RetryPolicyConfig,
    previous_weak_count: usize,
    previous_best: HashMap<String, f64>,
}

impl DefaultRetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self {
            config,
            previous_weak_count: 0,
            previous_best: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.previous_weak_count = 0;
        self.previous_best.clear();
    }

    /// True if this round has fewer weak columns than the last, or any weak
    /// column beat its own best score.
    fn improved(&self, assessment: &QualityAssessment) -> bool {
        if self.previous_weak_count == 0 || assessment.weak_columns.len() < self.previous_weak_count {
            return true;
        }
        assessment.weak_columns.iter().any(|wc| {
            self.previous_best
                .get(&wc.name)
                .is_some_and(|best| wc.confidence > *best)
        })
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyConfig::default())
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&mut self, attempt: u32, assessment: Option<&QualityAssessment>) -> bool {
        let Some(assessment) = assessment.filter(|a| !a.passed) else {
            return false;
        };

        if attempt >= self.config.max_retries {
            return false;
        }

        if assessment.weak_columns.len() < self.config.min_weak_columns {
            return false;
        }

        if self.config.require_improvement && attempt > 1 && !self.improved(assessment) {
            return false;
        }

        self.previous_weak_count = assessment.weak_columns.len();
        for wc in &assessment.weak_columns {
            let best = self
                .previous_best
                .entry(wc.name.clone())
                .or_insert(wc.confidence);
            if wc.confidence > *best {
                *best = wc.confidence;
            }
        }
        true
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_retries
    }

    fn confidence_threshold(&self) -> f64 {
        self.config.threshold
    }

    fn fresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.config.clone()))
    }
}

/// Retries any failed assessment until `max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysRetryPolicy {
    max_attempts: u32,
    threshold: f64,
}

impl AlwaysRetryPolicy {
    pub fn new(max_attempts: u32, threshold: f64) -> Self {
        Self {
            max_attempts,
            threshold,
        }
    }
}

impl RetryPolicy for AlwaysRetryPolicy {
    fn should_retry(&mut self, attempt: u32, assessment: Option<&QualityAssessment>) -> bool {
        match assessment {
            Some(a) if !a.passed => attempt < self.max_attempts,
            _ => false,
        }
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn confidence_threshold(&self) -> f64 {
        self.threshold
    }

    fn fresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(*self)
    }
}

/// Single attempt, no retries.
#[derive(Debug, Clone, Copy)]
pub struct NeverRetryPolicy {
    threshold: f64,
}

impl NeverRetryPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl RetryPolicy for NeverRetryPolicy {
    fn should_retry(&mut self, _attempt: u32, _assessment: Option<&QualityAssessment>) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    fn confidence_threshold(&self) -> f64 {
        self.threshold
    }

    fn fresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(*self)
    }
}
