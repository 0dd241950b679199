//! Assembly of a ready-to-run [`Enricher`] from capabilities and settings.

use std::sync::Arc;
use std::time::Duration;

use super::evaluator::QualityEvaluator;
use super::feedback_builder::FeedbackBuilder;
use super::policy::{DefaultRetryPolicy, RetryPolicy, RetryPolicyConfig};
use super::retry::{RetryOrchestrator, RunSummary};
use crate::error::{PipelineError, StateError};
use crate::feedback::AttemptStore;
use crate::models::{ColumnMetadata, EnrichmentResult, Job, JobProgress};
use crate::pipeline::{Capabilities, Pipeline, PipelineConfig, RunContext};
use crate::services::{
    CachedPatternGenerator, ContentExtractor, DecisionMaker, FallbackPatternGenerator,
    InMemoryPatternCache, PatternCache, QueryPatternGenerator, ValidatedPatternGenerator,
    WebCrawler, WebSearcher,
};
use crate::state::{InMemoryStore, StateManager, Store};

/// Builder for [`Enricher`].
///
/// Searcher, decision maker, crawler and extractor are required. Without a
/// pattern generator the keyword [`FallbackPatternGenerator`] is used. Any
/// generator is wrapped in validation and, unless disabled, a pattern cache.
///
/// # Example
///
/// ```rust,ignore
/// let enricher = EnrichmentBuilder::new()
///     .with_searcher(searcher)
///     .with_decision_maker(decider)
///     .with_crawler(crawler)
///     .with_extractor(extractor)
///     .with_pipeline_config(PipelineConfig::from_env()?)
///     .with_retry_config(RetryPolicyConfig::from_env()?)
///     .build()?;
/// ```
pub struct EnrichmentBuilder {
    store: Option<Arc<dyn Store>>,
    state: Option<Arc<StateManager>>,
    pipeline_config: PipelineConfig,
    retry_config: RetryPolicyConfig,
    policy: Option<Box<dyn RetryPolicy>>,
    pattern_generator: Option<Arc<dyn QueryPatternGenerator>>,
    searcher: Option<Arc<dyn WebSearcher>>,
    decision_maker: Option<Arc<dyn DecisionMaker>>,
    crawler: Option<Arc<dyn WebCrawler>>,
    extractor: Option<Arc<dyn ContentExtractor>>,
    pattern_cache: Option<Arc<dyn PatternCache>>,
    cache_patterns: bool,
    evaluator: Option<Arc<dyn QualityEvaluator>>,
    feedback_builder: Option<Arc<dyn FeedbackBuilder>>,
    attempt_store: Option<Arc<dyn AttemptStore>>,
    progress_interval: Option<Duration>,
}

impl Default for EnrichmentBuilder {
    fn default() -> Self {
        Self {
            store: None,
            state: None,
            pipeline_config: PipelineConfig::default(),
            retry_config: RetryPolicyConfig::default(),
            policy: None,
            pattern_generator: None,
            searcher: None,
            decision_maker: None,
            crawler: None,
            extractor: None,
            pattern_cache: None,
            cache_patterns: true,
            evaluator: None,
            feedback_builder: None,
            attempt_store: None,
            progress_interval: None,
        }
    }
}

impl EnrichmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backing store for a new [`StateManager`]. Ignored when
    /// [`with_state_manager`](Self::with_state_manager) is also set.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_state_manager(mut self, state: Arc<StateManager>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    /// Settings for the default retry policy.
    pub fn with_retry_config(mut self, config: RetryPolicyConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Replaces the default retry policy entirely.
    pub fn with_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_pattern_generator(mut self, generator: Arc<dyn QueryPatternGenerator>) -> Self {
        self.pattern_generator = Some(generator);
        self
    }

    pub fn with_searcher(mut self, searcher: Arc<dyn WebSearcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_decision_maker(mut self, decision_maker: Arc<dyn DecisionMaker>) -> Self {
        self.decision_maker = Some(decision_maker);
        self
    }

    pub fn with_crawler(mut self, crawler: Arc<dyn WebCrawler>) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_pattern_cache(mut self, cache: Arc<dyn PatternCache>) -> Self {
        self.pattern_cache = Some(cache);
        self.cache_patterns = true;
        self
    }

    pub fn without_pattern_cache(mut self) -> Self {
        self.pattern_cache = None;
        self.cache_patterns = false;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_feedback_builder(mut self, builder: Arc<dyn FeedbackBuilder>) -> Self {
        self.feedback_builder = Some(builder);
        self
    }

    pub fn with_attempt_store(mut self, store: Arc<dyn AttemptStore>) -> Self {
        self.attempt_store = Some(store);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<Enricher, PipelineError> {
        self.pipeline_config.validate()?;

        let policy = match self.policy {
            Some(policy) => policy,
            None => {
                self.retry_config.validate()?;
                Box::new(DefaultRetryPolicy::new(self.retry_config)) as Box<dyn RetryPolicy>
            }
        };

        let searcher = self.searcher.ok_or(PipelineError::MissingCapability("web_searcher"))?;
        let decision_maker = self
            .decision_maker
            .ok_or(PipelineError::MissingCapability("decision_maker"))?;
        let crawler = self.crawler.ok_or(PipelineError::MissingCapability("web_crawler"))?;
        let extractor = self
            .extractor
            .ok_or(PipelineError::MissingCapability("content_extractor"))?;

        let base: Arc<dyn QueryPatternGenerator> = self
            .pattern_generator
            .unwrap_or_else(|| Arc::new(FallbackPatternGenerator::new()) as Arc<dyn QueryPatternGenerator>);
        let mut pattern_generator: Arc<dyn QueryPatternGenerator> =
            Arc::new(ValidatedPatternGenerator::new(base));
        if self.cache_patterns {
            let cache = self
                .pattern_cache
                .unwrap_or_else(|| Arc::new(InMemoryPatternCache::new()) as Arc<dyn PatternCache>);
            pattern_generator = Arc::new(CachedPatternGenerator::new(pattern_generator, cache));
        }

        let state = match (self.state, self.store) {
            (Some(state), _) => state,
            (None, Some(store)) => Arc::new(StateManager::new(store)),
            (None, None) => Arc::new(StateManager::new(Arc::new(InMemoryStore::new()))),
        };

        let capabilities = Capabilities {
            pattern_generator,
            searcher,
            decision_maker,
            crawler,
            extractor,
        };
        let mut pipeline = Pipeline::standard(state.clone(), self.pipeline_config, capabilities);
        if let Some(interval) = self.progress_interval {
            pipeline = pipeline.with_progress_interval(interval);
        }

        let mut orchestrator = RetryOrchestrator::new(pipeline).with_policy(policy);
        if let Some(evaluator) = self.evaluator {
            orchestrator = orchestrator.with_evaluator(evaluator);
        }
        if let Some(builder) = self.feedback_builder {
            orchestrator = orchestrator.with_feedback_builder(builder);
        }
        if let Some(store) = self.attempt_store {
            orchestrator = orchestrator.with_attempt_store(store);
        }

        tracing::debug!(
            max_attempts = orchestrator.policy().max_attempts(),
            threshold = orchestrator.policy().confidence_threshold(),
            cache_patterns = self.cache_patterns,
            "Enricher built"
        );

        Ok(Enricher { orchestrator, state })
    }
}

/// Entry point for embedding applications: job lifecycle plus retried
/// enrichment runs.
pub struct Enricher {
    orchestrator: RetryOrchestrator,
    state: Arc<StateManager>,
}

impl Enricher {
    pub fn builder() -> EnrichmentBuilder {
        EnrichmentBuilder::new()
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn orchestrator(&self) -> &RetryOrchestrator {
        &self.orchestrator
    }

    pub async fn create_job(&self, total_rows: usize) -> Result<Job, StateError> {
        self.state.create_job(total_rows).await
    }

    pub async fn start_job(&self, job_id: &str, total_rows: usize) -> Result<(), StateError> {
        self.state.start_job(job_id, total_rows).await
    }

    /// Enrich the rows of a running job.
    ///
    /// While the run is in flight, [`cancel`](Self::cancel) or
    /// [`pause`](Self::pause) on this job stop the workers promptly.
    pub async fn enrich(
        &self,
        job_id: &str,
        row_keys: &[String],
        columns: Vec<ColumnMetadata>,
    ) -> Result<RunSummary, PipelineError> {
        let ctx = RunContext::new();
        let hook_ctx = ctx.clone();
        self.state
            .register_cancel_hook(job_id, Arc::new(move || hook_ctx.shutdown()));

        let result = self.orchestrator.run(&ctx, job_id, row_keys, columns).await;

        self.state.unregister_cancel_hook(job_id);
        result
    }

    pub async fn progress(&self, job_id: &str) -> Result<JobProgress, StateError> {
        self.state.progress(job_id).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), StateError> {
        self.state.cancel(job_id).await
    }

    pub async fn pause(&self, job_id: &str) -> Result<(), StateError> {
        self.state.pause(job_id).await
    }

    pub async fn resume(&self, job_id: &str) -> Result<(), StateError> {
        self.state.resume(job_id).await
    }

    pub async fn results(
        &self,
        job_id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<EnrichmentResult>, StateError> {
        self.state.results(job_id, offset, limit).await
    }
}
