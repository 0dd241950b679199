//! The stage contract and the worker pool that drives a stage.

use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::message::{Message, RunContext};
use super::progress::ProgressCounters;
use crate::models::RowStage;
use crate::state::{RowUpdate, StateManager};

/// One step of the pipeline.
///
/// `process` receives a healthy message and returns it, possibly with
/// `error` set. It must not retry capability calls itself. Messages that
/// already carry an error never reach `process`; the worker pool forwards
/// them untouched.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, msg: Message) -> Message;
}

/// Receiving end of a queue shared by all workers of one stage.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Message>>>;

/// Everything a stage's workers share.
pub(crate) struct StagePool {
    pub stage: Arc<dyn Stage>,
    pub index: usize,
    pub workers: usize,
    pub ctx: RunContext,
    pub state: Arc<StateManager>,
    pub counters: ProgressCounters,
}

impl StagePool {
    /// Spawn the pool's workers reading `inbound` and writing `outbound`.
    ///
    /// Each worker owns a clone of `outbound`, so the downstream queue
    /// closes once every worker has exited.
    pub fn spawn(
        self,
        inbound: mpsc::Receiver<Message>,
        outbound: mpsc::Sender<Message>,
    ) -> Vec<JoinHandle<()>> {
        let inbound: SharedReceiver = Arc::new(Mutex::new(inbound));
        let pool = Arc::new(self);

        (0..pool.workers.max(1))
            .map(|worker| {
                let pool = pool.clone();
                let inbound = inbound.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move { pool.run_worker(worker, inbound, outbound).await })
            })
            .collect()
    }

    async fn run_worker(
        &self,
        worker: usize,
        inbound: SharedReceiver,
        outbound: mpsc::Sender<Message>,
    ) {
        let stage = self.stage.name();
        tracing::trace!(stage, worker, "Stage worker started");
        let mut handled = 0usize;

        loop {
            let next = {
                let mut rx = inbound.lock().await;
                tokio::select! {
                    biased;
                    _ = self.ctx.cancelled() => None,
                    msg = rx.recv() => msg,
                }
            };
            let Some(msg) = next else { break };

            if self.job_halted(&msg.job_id).await {
                self.cancel_row(&msg).await;
                break;
            }

            let msg = if msg.is_failed() {
                msg
            } else {
                let out = self.stage.process(msg).await;
                if out.is_failed() {
                    if let Some(c) = self.counters.stage(self.index) {
                        c.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    // A successful transition proves the job was live, so
                    // only failed rows need the status re-checked.
                    if self.job_halted(&out.job_id).await {
                        break;
                    }
                }
                out
            };
            if let Some(c) = self.counters.stage(self.index) {
                c.processed.fetch_add(1, Ordering::Relaxed);
            }
            handled += 1;

            tokio::select! {
                biased;
                _ = self.ctx.cancelled() => break,
                sent = outbound.send(msg) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::trace!(stage, worker, handled, "Stage worker stopped");
    }

    async fn job_halted(&self, job_id: &str) -> bool {
        match self.state.check_cancelled(job_id).await {
            Ok(halted) => halted,
            Err(e) => {
                tracing::warn!(job_id = %job_id, stage = self.stage.name(), error = %e, "Job status check failed, stopping worker");
                true
            }
        }
    }

    async fn cancel_row(&self, msg: &Message) {
        // On a halted job this forces the row to CANCELLED and reports
        // JobCancelled, which is the expected outcome here.
        if let Err(e) = self
            .state
            .transition(&msg.job_id, &msg.row_key, RowStage::Cancelled, RowUpdate::new())
            .await
        {
            tracing::debug!(
                job_id = %msg.job_id,
                row_key = %msg.row_key,
                stage = self.stage.name(),
                reason = %e,
                "Row dropped, job halted"
            );
        }
    }
}
