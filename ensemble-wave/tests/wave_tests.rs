//! Wave launch, admission control, polling and collection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ensemble_wave::{
    collect_results, load_status, plan_wave, poll_wave_completion, AnalyzerTask, CommandLauncher,
    RunOptions, WaveError, WaveEvent, WavePlan, WaveRunner, WorkerExit, WorkerLauncher,
    WorkerOutcome,
};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

/// Sleeps for `work`, then writes a sentinel only for keys in `writes`.
struct ScriptedLauncher {
    writes: HashSet<String>,
    work: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    starts: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedLauncher {
    fn new(writes: &[&str], work: Duration) -> Arc<Self> {
        Arc::new(Self {
            writes: writes.iter().map(|s| s.to_string()).collect(),
            work,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> Vec<(String, Instant)> {
        self.starts.lock().expect("starts").clone()
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn run(&self, task: &AnalyzerTask) -> Result<WorkerExit, WaveError> {
        self.starts
            .lock()
            .expect("starts")
            .push((task.key.clone(), Instant::now()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        sleep(self.work).await;
        let writes = self.writes.contains(&task.key);
        if writes {
            let body = format!(
                r#"{{"analyzer":"{}","findings":[{{"id":"{}-1","severity":"low","title":"t"}}]}}"#,
                task.key, task.key
            );
            std::fs::write(&task.sentinel, body).expect("write sentinel");
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(if writes {
            WorkerExit::ok()
        } else {
            WorkerExit::failed(Some(1))
        })
    }
}

fn plan(dir: &TempDir, analyzers: &[&str]) -> WavePlan {
    let analyzers: Vec<String> = analyzers.iter().map(|s| s.to_string()).collect();
    let plan = plan_wave(dir.path(), &analyzers, "src/", "quality").expect("plan");
    plan.save().expect("save plan");
    plan
}

fn options(stagger_ms: u64, max_concurrent: usize) -> RunOptions {
    RunOptions {
        stagger: Duration::from_millis(stagger_ms),
        max_concurrent,
        poll_interval: Duration::from_secs(5),
    }
}

// ---------------------------------------------------------------------------
// Partial wave
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn partial_wave_times_out_but_collects_what_exists() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b"]);
    let launcher = ScriptedLauncher::new(&["a"], Duration::from_secs(30));
    let runner = WaveRunner::new(launcher.clone(), options(2_000, 0));

    let running = runner.run_wave(&plan).await.expect("run");
    let done = poll_wave_completion(&plan, Duration::from_secs(120), Duration::from_secs(5)).await;
    assert!(!done, "b never writes its sentinel");

    let reports = running.wait().await.expect("wait");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].outcome, WorkerOutcome::Completed);
    assert!(matches!(&reports[1].outcome, WorkerOutcome::Failed { reason } if reason.contains("code 1")));

    let results = collect_results(&plan);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].analyzer, "a");
    assert_eq!(results[0].findings.len(), 1);

    let status = load_status(&plan).expect("status").expect("status exists");
    assert_eq!(status.analyzers, vec!["a", "b"]);
    assert_eq!(status.completed, vec!["a"]);
    assert_eq!(status.failed, vec!["b"]);
    assert_eq!(status.stagger_ms, Some(2_000));
    assert_eq!(status.max_concurrent, Some(0));
}

#[tokio::test(start_paused = true)]
async fn full_wave_resolves_true() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b"]);
    let launcher = ScriptedLauncher::new(&["a", "b"], Duration::from_secs(10));
    let running = WaveRunner::new(launcher, options(1_000, 0))
        .run_wave(&plan)
        .await
        .expect("run");

    let started = Instant::now();
    assert!(poll_wave_completion(&plan, Duration::from_secs(600), Duration::from_secs(5)).await);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(running.wait().await.expect("wait").iter().all(|r| r.is_completed()));
    assert_eq!(collect_results(&plan).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn driver_outraces_poll_when_every_worker_fails() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b"]);
    let launcher = ScriptedLauncher::new(&[], Duration::from_secs(3));
    let mut running = WaveRunner::new(launcher, options(0, 0))
        .run_wave(&plan)
        .await
        .expect("run");

    let started = Instant::now();
    let poll = poll_wave_completion(&plan, Duration::from_secs(1_800), Duration::from_secs(5));
    tokio::pin!(poll);
    let reports = tokio::select! {
        _ = &mut poll => panic!("poll finished before the driver"),
        reports = running.join() => reports.expect("join"),
    };
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.is_completed()));
    assert!(plan.tasks.iter().all(|t| !t.sentinel.exists()));
    running.abort();
}

// ---------------------------------------------------------------------------
// Admission control
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launches_are_staggered() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b", "c"]);
    let launcher = ScriptedLauncher::new(&["a", "b", "c"], Duration::from_millis(10));
    let running = WaveRunner::new(launcher.clone(), options(2_000, 0))
        .run_wave(&plan)
        .await
        .expect("run");
    running.wait().await.expect("wait");

    let starts = launcher.starts();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(2_000));
    }
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_capped() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b", "c", "d", "e"]);
    let launcher = ScriptedLauncher::new(&["a", "b", "c", "d", "e"], Duration::from_secs(3));
    let running = WaveRunner::new(launcher.clone(), options(0, 2))
        .run_wave(&plan)
        .await
        .expect("run");
    let reports = running.wait().await.expect("wait");

    assert_eq!(reports.len(), 5);
    assert_eq!(launcher.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_means_unbounded() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b", "c", "d"]);
    let launcher = ScriptedLauncher::new(&["a", "b", "c", "d"], Duration::from_secs(3));
    let running = WaveRunner::new(launcher.clone(), options(0, 0))
        .run_wave(&plan)
        .await
        .expect("run");
    running.wait().await.expect("wait");
    assert_eq!(launcher.peak.load(Ordering::SeqCst), 4);
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn observer_sees_start_to_finish() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["a", "b"]);
    let events: Arc<Mutex<Vec<WaveEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    let runner = WaveRunner::new(ScriptedLauncher::new(&["a"], Duration::from_secs(1)), options(0, 1))
        .with_observer(Arc::new(move |event: &WaveEvent| {
            sink.lock().expect("events").push(event.clone());
        }));
    runner.run_wave(&plan).await.expect("run").wait().await.expect("wait");

    let events = events.lock().expect("events").clone();
    assert!(matches!(&events[0], WaveEvent::Started { analyzers: 2, .. }));
    assert!(events.contains(&WaveEvent::Launched { analyzer: "a".to_string() }));
    assert!(events.contains(&WaveEvent::Completed { analyzer: "a".to_string() }));
    assert!(events
        .iter()
        .any(|e| matches!(e, WaveEvent::Failed { analyzer, .. } if analyzer == "b")));
    assert_eq!(
        events.last(),
        Some(&WaveEvent::Finished {
            completed: 1,
            failed: 1
        })
    );
}

// ---------------------------------------------------------------------------
// Real processes
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn command_launcher_runs_shell_workers() {
    let dir = TempDir::new().expect("tempdir");
    let plan = plan(&dir, &["ok", "broken"]);
    let launcher = CommandLauncher::new(
        vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"if [ "$1" = ok ]; then printf '{"analyzer":"ok","findings":[]}' > "$0"; else exit 3; fi"#
                .to_string(),
            "{sentinel}".to_string(),
            "{key}".to_string(),
        ],
        dir.path(),
    )
    .expect("launcher");
    let options = RunOptions {
        stagger: Duration::ZERO,
        max_concurrent: 0,
        poll_interval: Duration::from_millis(20),
    };
    let running = WaveRunner::new(Arc::new(launcher), options)
        .run_wave(&plan)
        .await
        .expect("run");
    let reports = running.wait().await.expect("wait");

    assert!(reports[0].is_completed());
    assert!(matches!(&reports[1].outcome, WorkerOutcome::Failed { reason } if reason.contains("code 3")));
    assert!(plan.dir.join("broken.log").exists());

    let results = collect_results(&plan);
    assert_eq!(results.len(), 1);
    assert!(results[0].findings.is_empty());
    assert!(!poll_wave_completion(&plan, Duration::from_millis(50), Duration::from_millis(10)).await);
}
