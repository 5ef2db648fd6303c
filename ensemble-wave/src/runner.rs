//! Staggered, bounded launch of analyzer workers, and sentinel polling.
//!
//! Admission: one worker starts per `stagger`, and at most `max_concurrent`
//! hold a permit at once (0 = unbounded). A permit is released when the
//! worker's sentinel appears or its process exits, whichever is first.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};

use ensemble_core::config::WaveConfig;
use ensemble_core::DocumentStore;

use crate::error::{io_err, WaveError};
use crate::launcher::WorkerLauncher;
use crate::plan::{AnalyzerTask, WavePlan};
use crate::status::{status_store, update_status, StatusStore, WaveStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub stagger: Duration,
    /// 0 = unbounded.
    pub max_concurrent: usize,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&WaveConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &WaveConfig) -> Self {
        Self {
            stagger: Duration::from_millis(config.stagger_ms),
            max_concurrent: config.max_concurrent,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress callback
// ---------------------------------------------------------------------------

/// Progress notifications, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WaveEvent {
    Started { trace_id: String, analyzers: usize },
    Launched { analyzer: String },
    Completed { analyzer: String },
    Failed { analyzer: String, reason: String },
    Finished { completed: usize, failed: usize },
}

/// The single hook a dashboard needs. Called from worker tasks; must not block.
pub trait WaveObserver: Send + Sync {
    fn on_event(&self, event: &WaveEvent);
}

impl<F> WaveObserver for F
where
    F: Fn(&WaveEvent) + Send + Sync,
{
    fn on_event(&self, event: &WaveEvent) {
        self(event)
    }
}

fn quiet() -> Arc<dyn WaveObserver> {
    Arc::new(|_: &WaveEvent| {})
}

// ---------------------------------------------------------------------------
// Worker outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Completed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub analyzer: String,
    #[serde(flatten)]
    pub outcome: WorkerOutcome,
}

impl WorkerReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == WorkerOutcome::Completed
    }
}

/// Handle to a wave whose workers are being launched in the background.
pub struct RunningWave {
    trace_id: String,
    driver: JoinHandle<Vec<WorkerReport>>,
}

impl RunningWave {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Wait for every worker to finish; reports are in plan order.
    pub async fn wait(mut self) -> Result<Vec<WorkerReport>, WaveError> {
        self.join().await
    }

    /// Like [`wait`](Self::wait) but keeps the handle, so it can race other
    /// futures and still be aborted afterwards. Must not be awaited again
    /// once it has returned.
    pub async fn join(&mut self) -> Result<Vec<WorkerReport>, WaveError> {
        (&mut self.driver)
            .await
            .map_err(|err| WaveError::Join(err.to_string()))
    }

    /// Stop launching and drop every in-flight worker task. Processes already
    /// spawned keep running; their sentinels can still be collected later.
    pub fn abort(&self) {
        self.driver.abort();
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct WaveRunner {
    launcher: Arc<dyn WorkerLauncher>,
    observer: Arc<dyn WaveObserver>,
    options: RunOptions,
}

impl WaveRunner {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, options: RunOptions) -> Self {
        Self {
            launcher,
            observer: quiet(),
            options,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WaveObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// Write the wave's status document and start launching workers.
    ///
    /// Returns once the driver task is spawned; launching continues in the
    /// background under the stagger and concurrency limits.
    pub async fn run_wave(&self, plan: &WavePlan) -> Result<RunningWave, WaveError> {
        std::fs::create_dir_all(&plan.dir).map_err(|e| io_err(&plan.dir, e))?;
        let store = Arc::new(status_store(plan));
        store.save(&WaveStatus {
            audit_type: plan.audit_type.clone(),
            analyzers: plan.keys(),
            completed: Vec::new(),
            failed: Vec::new(),
            started_at: chrono::Utc::now(),
            stagger_ms: Some(u64::try_from(self.options.stagger.as_millis()).unwrap_or(u64::MAX)),
            max_concurrent: Some(self.options.max_concurrent),
        })?;

        tracing::info!(
            trace_id = %plan.trace_id,
            analyzers = plan.tasks.len(),
            stagger_ms = self.options.stagger.as_millis() as u64,
            max_concurrent = self.options.max_concurrent,
            "wave started",
        );
        self.observer.on_event(&WaveEvent::Started {
            trace_id: plan.trace_id.clone(),
            analyzers: plan.tasks.len(),
        });

        let driver = tokio::spawn(drive(
            plan.tasks.clone(),
            Arc::clone(&self.launcher),
            Arc::clone(&self.observer),
            self.options,
            store,
        ));
        Ok(RunningWave {
            trace_id: plan.trace_id.clone(),
            driver,
        })
    }
}

async fn drive(
    tasks: Vec<AnalyzerTask>,
    launcher: Arc<dyn WorkerLauncher>,
    observer: Arc<dyn WaveObserver>,
    options: RunOptions,
    store: Arc<StatusStore>,
) -> Vec<WorkerReport> {
    let semaphore = (options.max_concurrent > 0)
        .then(|| Arc::new(Semaphore::new(options.max_concurrent)));
    let mut workers = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        if index > 0 && !options.stagger.is_zero() {
            sleep(options.stagger).await;
        }
        let permit = match &semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };

        tracing::debug!(analyzer = %task.key, "launching worker");
        observer.on_event(&WaveEvent::Launched {
            analyzer: task.key.clone(),
        });
        let launcher = Arc::clone(&launcher);
        let observer = Arc::clone(&observer);
        let store = Arc::clone(&store);
        workers.spawn(async move {
            let _permit = permit;
            let report = run_worker(&task, launcher.as_ref(), options.poll_interval).await;
            match &report.outcome {
                WorkerOutcome::Completed => {
                    let key = task.key.clone();
                    update_status(&store, move |s| s.mark_completed(&key)).await;
                    observer.on_event(&WaveEvent::Completed {
                        analyzer: task.key.clone(),
                    });
                }
                WorkerOutcome::Failed { reason } => {
                    tracing::warn!(analyzer = %task.key, reason = %reason, "worker failed");
                    let key = task.key.clone();
                    update_status(&store, move |s| s.mark_failed(&key)).await;
                    observer.on_event(&WaveEvent::Failed {
                        analyzer: task.key.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            (index, report)
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(entry) => reports.push(entry),
            Err(err) => tracing::error!(error = %err, "wave worker task panicked"),
        }
    }
    reports.sort_by_key(|(index, _)| *index);
    let reports: Vec<WorkerReport> = reports.into_iter().map(|(_, r)| r).collect();

    let completed = reports.iter().filter(|r| r.is_completed()).count();
    let failed = reports.len() - completed;
    tracing::info!(completed, failed, "wave workers finished");
    observer.on_event(&WaveEvent::Finished { completed, failed });
    reports
}

async fn run_worker(
    task: &AnalyzerTask,
    launcher: &dyn WorkerLauncher,
    poll_interval: Duration,
) -> WorkerReport {
    let outcome = tokio::select! {
        exit = launcher.run(task) => match exit {
            Ok(_) if task.sentinel.exists() => WorkerOutcome::Completed,
            Ok(exit) => WorkerOutcome::Failed {
                reason: match exit.code {
                    Some(code) => format!("worker exited with code {code} without writing {}", task.sentinel.display()),
                    None => format!("worker was killed before writing {}", task.sentinel.display()),
                },
            },
            Err(err) => WorkerOutcome::Failed { reason: err.to_string() },
        },
        () = wait_for_file(&task.sentinel, poll_interval) => WorkerOutcome::Completed,
    };
    WorkerReport {
        analyzer: task.key.clone(),
        outcome,
    }
}

async fn wait_for_file(path: &Path, interval: Duration) {
    while !path.exists() {
        sleep(interval).await;
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll every `interval` until each analyzer's sentinel exists (`true`) or
/// `timeout` elapses (`false`). Newly seen sentinels are marked completed in
/// the status document when it exists.
pub async fn poll_wave_completion(plan: &WavePlan, timeout: Duration, interval: Duration) -> bool {
    let store = Arc::new(status_store(plan));
    let deadline = Instant::now() + timeout;
    loop {
        let done: Vec<String> = plan
            .tasks
            .iter()
            .filter(|t| t.sentinel.exists())
            .map(|t| t.key.clone())
            .collect();
        let seen = done.len();
        if seen > 0 && plan.status_path().is_file() {
            update_status(&store, move |s| {
                for key in &done {
                    s.mark_completed(key);
                }
            })
            .await;
        }
        if seen == plan.tasks.len() {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(
                trace_id = %plan.trace_id,
                done = seen,
                expected = plan.tasks.len(),
                "wave timed out",
            );
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}
