//! `ensemble wave plan | run | status | collect`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use ensemble_wave::{
    collect_results, load_status, plan_wave, poll_wave_completion, summarize, AnalyzerResult,
    CommandLauncher, RunOptions, WaveError, WaveEvent, WavePlan, WaveRunner, WaveSummary,
    WorkerReport,
};

use super::{emit, ok_mark, Globals};

#[derive(Subcommand, Debug)]
pub enum WaveCommand {
    /// Write a wave plan; prints its trace id.
    Plan {
        /// Analyzer name; repeat for each analyzer.
        #[arg(long = "analyzer", short = 'a', required = true)]
        analyzers: Vec<String>,

        /// What to analyze.
        #[arg(long, default_value = ".")]
        target: String,

        #[arg(long, default_value = "quality")]
        audit_type: String,
    },

    /// Launch a planned wave and wait for its sentinels.
    Run {
        trace_id: String,

        #[arg(long)]
        stagger_ms: Option<u64>,

        /// 0 = unbounded.
        #[arg(long)]
        max_concurrent: Option<usize>,

        #[arg(long)]
        timeout_minutes: Option<u64>,
    },

    /// Show which analyzers have reported.
    Status { trace_id: String },

    /// Gather findings from whatever sentinels exist.
    Collect { trace_id: String },
}

pub fn run(command: WaveCommand, globals: &Globals) -> Result<()> {
    match command {
        WaveCommand::Plan {
            analyzers,
            target,
            audit_type,
        } => plan(globals, &analyzers, &target, &audit_type),
        WaveCommand::Run {
            trace_id,
            stagger_ms,
            max_concurrent,
            timeout_minutes,
        } => {
            let mut config = globals.config()?.wave;
            if let Some(ms) = stagger_ms {
                config.stagger_ms = ms;
            }
            if let Some(n) = max_concurrent {
                config.max_concurrent = n;
            }
            if let Some(m) = timeout_minutes {
                config.timeout_minutes = m;
            }
            let timeout = Duration::from_secs(config.timeout_minutes.saturating_mul(60));
            let wave = open_plan(globals, &trace_id)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start tokio runtime")?;
            let outcome =
                runtime.block_on(execute(globals, wave, RunOptions::from_config(&config), timeout))?;
            emit(globals, &outcome, print_run)
        }
        WaveCommand::Status { trace_id } => {
            let wave = open_plan(globals, &trace_id)?;
            let status = load_status(&wave)
                .context("failed to read wave status")?
                .with_context(|| format!("wave {trace_id} has not been run"))?;
            emit(globals, &status, |s| {
                println!(
                    "{} audit: {} completed, {} failed, {} pending",
                    s.audit_type,
                    s.completed.len(),
                    s.failed.len(),
                    s.pending().len()
                );
                for key in s.pending() {
                    println!("  {} {key}", "…".bright_black());
                }
            })
        }
        WaveCommand::Collect { trace_id } => {
            let wave = open_plan(globals, &trace_id)?;
            let results = collect_results(&wave);
            let report = CollectReport {
                trace_id,
                summary: summarize(&wave, &results),
                results,
            };
            emit(globals, &report, print_collect)
        }
    }
}

fn wave_dir(globals: &Globals, trace_id: &str) -> Result<PathBuf> {
    Ok(globals.layout()?.waves_dir().join(trace_id))
}

fn open_plan(globals: &Globals, trace_id: &str) -> Result<WavePlan> {
    let dir = wave_dir(globals, trace_id)?;
    WavePlan::open(&dir).with_context(|| format!("unknown wave '{trace_id}'"))
}

fn plan(globals: &Globals, analyzers: &[String], target: &str, audit_type: &str) -> Result<()> {
    let waves_dir = globals.layout()?.waves_dir();
    let wave = plan_wave(&waves_dir, analyzers, target, audit_type).context("invalid wave plan")?;
    wave.save().context("failed to write wave plan")?;
    tracing::info!(trace_id = %wave.trace_id, analyzers = wave.tasks.len(), "wave planned");
    emit(globals, &wave, |w| {
        println!("{} Planned wave {}", ok_mark(), w.trace_id);
        for task in &w.tasks {
            println!("  {} -> {}", task.analyzer, task.sentinel.display());
        }
        println!("Run: ensemble wave run {}", w.trace_id);
    })
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunReport {
    trace_id: String,
    /// Every sentinel appeared before the timeout.
    complete: bool,
    /// Per-worker outcomes; empty when the wave timed out with workers
    /// still running.
    workers: Vec<WorkerReport>,
    summary: WaveSummary,
    results: Vec<AnalyzerResult>,
}

async fn execute(
    globals: &Globals,
    wave: WavePlan,
    options: RunOptions,
    timeout: Duration,
) -> Result<RunReport> {
    let config = globals.config()?;
    let launcher = CommandLauncher::from_config(&config, globals.main_root()?)
        .context("invalid wave.worker_command")?;
    let mut runner = WaveRunner::new(Arc::new(launcher), options);
    if !globals.json {
        runner = runner.with_observer(Arc::new(progress));
    }

    let mut running = runner.run_wave(&wave).await.context("failed to launch wave")?;
    let poll = poll_wave_completion(&wave, timeout, options.poll_interval);
    tokio::pin!(poll);
    let first = tokio::select! {
        complete = &mut poll => Finished::Polled(complete),
        reports = running.join() => Finished::Driver(reports),
    };
    let (complete, workers) = match first {
        Finished::Polled(true) => (true, running.wait().await.context("wave driver failed")?),
        Finished::Polled(false) => {
            running.abort();
            (false, Vec::new())
        }
        Finished::Driver(reports) => {
            // Every worker has exited; nothing else will write a sentinel.
            let reports = reports.context("wave driver failed")?;
            let complete = wave.tasks.iter().all(|t| t.sentinel.exists());
            if !complete {
                tracing::warn!(trace_id = %wave.trace_id, "wave workers exited before reporting");
            }
            (complete, reports)
        }
    };

    let results = collect_results(&wave);
    Ok(RunReport {
        trace_id: wave.trace_id.clone(),
        complete,
        workers,
        summary: summarize(&wave, &results),
        results,
    })
}

/// Whichever of the sentinel poll and the worker driver ends first.
enum Finished {
    Polled(bool),
    Driver(Result<Vec<WorkerReport>, WaveError>),
}

fn progress(event: &WaveEvent) {
    match event {
        WaveEvent::Started {
            trace_id,
            analyzers,
        } => eprintln!("wave {trace_id}: {analyzers} analyzer(s)"),
        WaveEvent::Launched { analyzer } => eprintln!("  {} {analyzer}", "→".cyan()),
        WaveEvent::Completed { analyzer } => eprintln!("  {} {analyzer}", ok_mark()),
        WaveEvent::Failed { analyzer, reason } => {
            eprintln!("  {} {analyzer}: {reason}", "✗".red().bold())
        }
        WaveEvent::Finished { completed, failed } => {
            eprintln!("wave finished: {completed} completed, {failed} failed")
        }
    }
}

fn print_run(report: &RunReport) {
    if !report.complete {
        println!(
            "{} Timed out; {} of {} analyzer(s) reported",
            "!".yellow().bold(),
            report.summary.reported,
            report.summary.expected
        );
    }
    print_summary(&report.summary, &report.results);
}

// ---------------------------------------------------------------------------
// Collect
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CollectReport {
    trace_id: String,
    summary: WaveSummary,
    results: Vec<AnalyzerResult>,
}

fn print_collect(report: &CollectReport) {
    println!("wave {}", report.trace_id);
    print_summary(&report.summary, &report.results);
}

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "analyzer")]
    analyzer: String,
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "title")]
    title: String,
}

fn print_summary(summary: &WaveSummary, results: &[AnalyzerResult]) {
    println!(
        "{}/{} analyzer(s) reported, {} finding(s)",
        summary.reported, summary.expected, summary.findings
    );
    for (severity, count) in &summary.by_severity {
        println!("  {severity}: {count}");
    }
    for bad in results.iter().filter(|r| r.error) {
        println!(
            "{} {}: {}",
            "✗".red().bold(),
            bad.analyzer,
            bad.error_message.as_deref().unwrap_or("malformed findings")
        );
    }
    let rows: Vec<FindingRow> = results
        .iter()
        .flat_map(|r| {
            r.findings.iter().map(|f| FindingRow {
                analyzer: r.analyzer.clone(),
                severity: f.severity.clone(),
                id: f.id.clone(),
                title: f.title.clone(),
            })
        })
        .collect();
    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}
