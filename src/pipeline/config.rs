//! Pipeline configuration.
//!
//! Worker pool sizes per stage, the bounded queue capacity between stages,
//! and the URL budget handed to the decision maker.

use crate::error::ConfigError;

pub const DEFAULT_WORKERS_PER_STAGE: usize = 5;
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 100;
pub const DEFAULT_MAX_URLS: usize = 3;

/// Worker count for each of the standard stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageWorkers {
    pub pattern: usize,
    pub serp: usize,
    pub decision: usize,
    pub crawl: usize,
    pub extract: usize,
}

impl StageWorkers {
    /// The same worker count for every stage.
    pub fn uniform(workers: usize) -> Self {
        Self {
            pattern: workers,
            serp: workers,
            decision: workers,
            crawl: workers,
            extract: workers,
        }
    }

    /// Worker count for a stage by name. Unknown stages get the largest
    /// configured pool.
    pub fn for_stage(&self, name: &str) -> usize {
        match name {
            "pattern" => self.pattern,
            "serp" => self.serp,
            "decision" => self.decision,
            "crawl" => self.crawl,
            "extract" => self.extract,
            _ => self.max(),
        }
    }

    fn max(&self) -> usize {
        [self.pattern, self.serp, self.decision, self.crawl, self.extract]
            .into_iter()
            .max()
            .unwrap_or(DEFAULT_WORKERS_PER_STAGE)
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> {
        [
            ("pattern", self.pattern),
            ("serp", self.serp),
            ("decision", self.decision),
            ("crawl", self.crawl),
            ("extract", self.extract),
        ]
        .into_iter()
    }
}

impl Default for StageWorkers {
    fn default() -> Self {
        Self::uniform(DEFAULT_WORKERS_PER_STAGE)
    }
}

/// Configuration for a [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Worker pool size per stage.
    pub stage_workers: StageWorkers,
    /// Capacity of every inter-stage queue.
    pub channel_buffer_size: usize,
    /// Upper bound on URLs the decision stage may select per row.
    pub max_urls: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_workers: StageWorkers::default(),
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            max_urls: DEFAULT_MAX_URLS,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ENRICH_WORKERS_PER_STAGE`: Workers for every stage (default: 5)
    /// - `ENRICH_PATTERN_WORKERS`, `ENRICH_SERP_WORKERS`,
    ///   `ENRICH_DECISION_WORKERS`, `ENRICH_CRAWL_WORKERS`,
    ///   `ENRICH_EXTRACT_WORKERS`: Per-stage overrides
    /// - `ENRICH_CHANNEL_BUFFER_SIZE`: Queue capacity (default: 100)
    /// - `ENRICH_MAX_URLS`: URLs crawled per row (default: 3)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENRICH_WORKERS_PER_STAGE") {
            let workers = parse_env_value(&val, "ENRICH_WORKERS_PER_STAGE")?;
            config.stage_workers = StageWorkers::uniform(workers);
        }

        let overrides: [(&str, &mut usize); 5] = [
            ("ENRICH_PATTERN_WORKERS", &mut config.stage_workers.pattern),
            ("ENRICH_SERP_WORKERS", &mut config.stage_workers.serp),
            ("ENRICH_DECISION_WORKERS", &mut config.stage_workers.decision),
            ("ENRICH_CRAWL_WORKERS", &mut config.stage_workers.crawl),
            ("ENRICH_EXTRACT_WORKERS", &mut config.stage_workers.extract),
        ];
        for (key, slot) in overrides {
            if let Ok(val) = std::env::var(key) {
                *slot = parse_env_value(&val, key)?;
            }
        }

        if let Ok(val) = std::env::var("ENRICH_CHANNEL_BUFFER_SIZE") {
            config.channel_buffer_size = parse_env_value(&val, "ENRICH_CHANNEL_BUFFER_SIZE")?;
        }

        if let Ok(val) = std::env::var("ENRICH_MAX_URLS") {
            config.max_urls = parse_env_value(&val, "ENRICH_MAX_URLS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((name, _)) = self.stage_workers.iter().find(|(_, n)| *n == 0) {
            return Err(ConfigError::ValidationFailed(format!(
                "{} stage must have at least one worker",
                name
            )));
        }

        if self.channel_buffer_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "channel_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.max_urls == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_urls must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_workers_per_stage(mut self, workers: usize) -> Self {
        self.stage_workers = StageWorkers::uniform(workers);
        self
    }

    pub fn with_stage_workers(mut self, workers: StageWorkers) -> Self {
        self.stage_workers = workers;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    pub fn with_max_urls(mut self, max: usize) -> Self {
        self.max_urls = max;
        self
    }
}

/// Parse an environment variable value into a type.
pub(crate) fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
pub(crate) fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
