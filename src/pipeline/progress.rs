//! Background progress monitor for pipeline runs.
//!
//! Stage workers bump shared atomic counters; the monitor wakes on an
//! interval and logs a one-line summary so long enrichment runs can be
//! followed without reading per-row events.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Counters for one stage.
#[derive(Debug)]
pub struct StageCounters {
    pub name: &'static str,
    /// Messages the stage handled, failed or not.
    pub processed: AtomicUsize,
    /// Messages the stage itself failed.
    pub failed: AtomicUsize,
}

impl StageCounters {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }
}

/// Point-in-time view of one stage's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub name: &'static str,
    pub processed: usize,
    pub failed: usize,
}

/// Point-in-time view of all counters.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Rows handed to the first stage.
    pub fed: usize,
    /// Rows that left the last stage.
    pub collected: usize,
    pub stages: Vec<StageSnapshot>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn stage(&self, name: &str) -> Option<&StageSnapshot> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Shared atomic counters, cloned into every worker.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    pub fed: Arc<AtomicUsize>,
    pub collected: Arc<AtomicUsize>,
    stages: Arc<[StageCounters]>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ProgressCounters {
    /// Zeroed counters for the named stages.
    pub fn new(stage_names: &[&'static str]) -> Self {
        Self {
            fed: Arc::new(AtomicUsize::new(0)),
            collected: Arc::new(AtomicUsize::new(0)),
            stages: stage_names.iter().map(|n| StageCounters::new(*n)).collect(),
        }
    }

    pub fn stage(&self, index: usize) -> Option<&StageCounters> {
        self.stages.get(index)
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            fed: self.fed.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
            stages: self
                .stages
                .iter()
                .map(|s| StageSnapshot {
                    name: s.name,
                    processed: s.processed.load(Ordering::Relaxed),
                    failed: s.failed.load(Ordering::Relaxed),
                })
                .collect(),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs pipeline progress.
///
/// Call [`ProgressMonitor::stop`] to cancel; dropping the monitor also
/// stops it at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start logging `counters` every `interval`. `job_id` and
    /// `total_rows` are included in every line.
    pub fn start(
        counters: ProgressCounters,
        job_id: String,
        total_rows: usize,
        interval: Duration,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total_rows > 0 {
                    (snap.collected as f64 / total_rows as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let stages = snap
                    .stages
                    .iter()
                    .map(|s| format!("{}={}/{}", s.name, s.processed, s.failed))
                    .collect::<Vec<_>>()
                    .join(" ");

                tracing::info!(
                    job_id = %job_id,
                    fed = snap.fed,
                    collected = snap.collected,
                    total_rows,
                    progress_pct = format!("{:.1}%", pct),
                    stages = %stages,
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Pipeline progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters_default() {
        let counters = ProgressCounters::new(&["serp", "decision"]);
        let snap = counters.snapshot(Instant::now());
        assert_eq!(snap.fed, 0);
        assert_eq!(snap.collected, 0);
        assert_eq!(snap.stages.len(), 2);
        assert_eq!(snap.stage("serp").map(|s| s.processed), Some(0));
    }

    #[test]
    fn test_progress_counters_shared_across_clones() {
        let counters = ProgressCounters::new(&["serp"]);
        let clone = counters.clone();
        clone.fed.fetch_add(3, Ordering::Relaxed);
        if let Some(stage) = clone.stage(0) {
            stage.processed.fetch_add(2, Ordering::Relaxed);
            stage.failed.fetch_add(1, Ordering::Relaxed);
        }

        let snap = counters.snapshot(Instant::now());
        assert_eq!(snap.fed, 3);
        let serp = snap.stage("serp").expect("serp stage");
        assert_eq!(serp.processed, 2);
        assert_eq!(serp.failed, 1);
        assert!(counters.stage(1).is_none());
    }

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let monitor = ProgressMonitor::start(
            ProgressCounters::new(&["serp"]),
            "job-1".to_string(),
            10,
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.stop().await;
    }
}
