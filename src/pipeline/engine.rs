//! The staged pipeline engine.
//!
//! For N stages the engine wires N+1 bounded queues: a feeder writes the
//! first, stage `i` reads queue `i` and writes queue `i + 1`, and the caller
//! drains the last. Each queue closes once every producer feeding it has
//! exited, so closing propagates stage by stage after the feeder finishes.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::PipelineConfig;
use super::message::{Message, RunContext};
use super::progress::{ProgressCounters, ProgressMonitor};
use super::stage::{Stage, StagePool};
use super::stages::{
    Capabilities, CrawlStage, DecisionStage, ExtractStage, PatternStage, SerpStage,
};
use crate::error::{PipelineError, StateError};
use crate::models::{ColumnMetadata, RowStage, RowState};
use crate::state::{RowUpdate, StateManager};

/// Outcome counts of a [`Pipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub total_rows: usize,
    pub completed: usize,
    pub failed: usize,
    /// Rows that never reached the end because the job was halted.
    pub dropped: usize,
    pub duration_ms: u64,
}

/// A running set of stage workers plus the terminal queue.
struct Launched {
    output: mpsc::Receiver<Message>,
    handles: Vec<JoinHandle<()>>,
    monitor: Option<ProgressMonitor>,
}

/// Generic N-stage concurrent runner.
///
/// The pipeline itself holds no per-run state: every call to
/// [`Pipeline::execute`] or [`Pipeline::run`] builds fresh queues and
/// worker pools.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    state: Arc<StateManager>,
    config: PipelineConfig,
    counters: ProgressCounters,
    progress_interval: Option<Duration>,
}

impl Pipeline {
    /// An empty pipeline; add stages with [`Pipeline::with_stage`].
    pub fn new(state: Arc<StateManager>, config: PipelineConfig) -> Self {
        Self {
            stages: Vec::new(),
            state,
            config,
            counters: ProgressCounters::default(),
            progress_interval: None,
        }
    }

    /// Pattern, SERP, decision, crawl and extract, in that order.
    pub fn standard(
        state: Arc<StateManager>,
        config: PipelineConfig,
        capabilities: Capabilities,
    ) -> Self {
        let max_urls = config.max_urls;
        Self::new(state.clone(), config)
            .with_stage(Arc::new(PatternStage::new(
                capabilities.pattern_generator,
                state.clone(),
            )))
            .with_stage(Arc::new(SerpStage::new(capabilities.searcher, state.clone())))
            .with_stage(Arc::new(DecisionStage::new(
                capabilities.decision_maker,
                state.clone(),
                max_urls,
            )))
            .with_stage(Arc::new(CrawlStage::new(capabilities.crawler, state.clone())))
            .with_stage(Arc::new(ExtractStage::new(capabilities.extractor, state)))
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        let names: Vec<&'static str> = self.stages.iter().map(|s| s.name()).collect();
        self.counters = ProgressCounters::new(&names);
        self
    }

    /// Log progress every `interval` while a run is in flight.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Counters accumulated across every run of this pipeline.
    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    /// Initialize `job_id` with one row per key, push every row through
    /// every stage, mark clean rows `COMPLETED`, then complete the job.
    ///
    /// Rows that failed a stage stay `FAILED`. Only initialization errors
    /// are returned; row failures live in the stored row state.
    pub async fn run(
        &self,
        ctx: &RunContext,
        job_id: &str,
        row_keys: &[String],
        columns: Vec<ColumnMetadata>,
    ) -> Result<PipelineSummary, PipelineError> {
        let started = Instant::now();
        self.state.initialize_job(job_id, row_keys).await?;

        let columns = Arc::new(columns);
        let messages = row_keys
            .iter()
            .map(|key| Message::new(job_id, RowState::new(key.as_str()), columns.clone()))
            .collect();

        let mut launched = self.launch(ctx, job_id, row_keys.len(), messages)?;
        let mut summary = PipelineSummary {
            total_rows: row_keys.len(),
            ..Default::default()
        };

        while let Some(msg) = launched.output.recv().await {
            self.counters.collected.fetch_add(1, Ordering::Relaxed);
            if msg.is_failed() {
                summary.failed += 1;
                continue;
            }
            match self
                .state
                .transition(job_id, &msg.row_key, RowStage::Completed, RowUpdate::new())
                .await
            {
                Ok(_) => summary.completed += 1,
                Err(StateError::JobCancelled(_)) => summary.dropped += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, row_key = %msg.row_key, error = %e, "Failed to complete row");
                    summary.failed += 1;
                }
            }
        }
        join_all_workers(launched.handles).await;
        if let Some(monitor) = launched.monitor {
            monitor.stop().await;
        }

        summary.dropped += summary
            .total_rows
            .saturating_sub(summary.completed + summary.failed + summary.dropped);
        summary.duration_ms = started.elapsed().as_millis() as u64;

        if self.state.check_cancelled(job_id).await? {
            tracing::info!(job_id = %job_id, dropped = summary.dropped, "Pipeline stopped, job halted");
        } else {
            self.state.complete(job_id).await?;
        }

        tracing::info!(
            job_id = %job_id,
            total_rows = summary.total_rows,
            completed = summary.completed,
            failed = summary.failed,
            dropped = summary.dropped,
            duration_ms = summary.duration_ms,
            "Pipeline run finished"
        );
        Ok(summary)
    }

    /// Push `messages` through every stage and return what comes out of
    /// the last one, in completion order.
    ///
    /// No row is initialized or finalized here; callers own that.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, PipelineError> {
        let total = messages.len();
        let job_id = messages
            .first()
            .map(|m| m.job_id.clone())
            .unwrap_or_default();

        let mut launched = self.launch(ctx, &job_id, total, messages)?;
        let mut collected = Vec::with_capacity(total);
        while let Some(msg) = launched.output.recv().await {
            self.counters.collected.fetch_add(1, Ordering::Relaxed);
            collected.push(msg);
        }
        join_all_workers(launched.handles).await;
        if let Some(monitor) = launched.monitor {
            monitor.stop().await;
        }
        Ok(collected)
    }

    fn launch(
        &self,
        ctx: &RunContext,
        job_id: &str,
        total_rows: usize,
        messages: Vec<Message>,
    ) -> Result<Launched, PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        let capacity = self.config.channel_buffer_size.max(1);
        let mut handles = Vec::new();

        let (feed_tx, mut upstream) = mpsc::channel::<Message>(capacity);
        for (index, stage) in self.stages.iter().enumerate() {
            let (tx, rx) = mpsc::channel::<Message>(capacity);
            let pool = StagePool {
                stage: stage.clone(),
                index,
                workers: self.config.stage_workers.for_stage(stage.name()),
                ctx: ctx.clone(),
                state: self.state.clone(),
                counters: self.counters.clone(),
            };
            handles.extend(pool.spawn(upstream, tx));
            upstream = rx;
        }

        let feeder_ctx = ctx.clone();
        let fed = self.counters.fed.clone();
        handles.push(tokio::spawn(async move {
            for msg in messages {
                tokio::select! {
                    biased;
                    _ = feeder_ctx.cancelled() => break,
                    sent = feed_tx.send(msg) => {
                        if sent.is_err() {
                            break;
                        }
                        fed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));

        tracing::debug!(
            job_id = %job_id,
            stages = self.stages.len(),
            rows = total_rows,
            capacity,
            "Pipeline launched"
        );

        let monitor = self.progress_interval.map(|interval| {
            ProgressMonitor::start(self.counters.clone(), job_id.to_string(), total_rows, interval)
        });

        Ok(Launched {
            output: upstream,
            handles,
            monitor,
        })
    }
}

async fn join_all_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Pipeline worker panicked");
        }
    }
}
