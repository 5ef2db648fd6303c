//! Wave orchestrator: fan independent analyzers out as worker processes,
//! observe completion through sentinel files, and gather their findings.
//!
//! A wave lives in `<main>/.ensemble/waves/<trace_id>/`:
//! `plan.json`, `status.json`, and one `<key>.findings.json` per analyzer.

pub mod collect;
pub mod error;
pub mod launcher;
pub mod plan;
pub mod runner;
pub mod status;

pub use collect::{collect_results, summarize, AnalyzerResult, Finding, WaveSummary};
pub use error::WaveError;
pub use launcher::{CommandLauncher, WorkerExit, WorkerLauncher};
pub use plan::{plan_wave, sanitize_key, AnalyzerTask, WavePlan};
pub use runner::{
    poll_wave_completion, RunOptions, RunningWave, WaveEvent, WaveObserver, WaveRunner,
    WorkerOutcome, WorkerReport,
};
pub use status::{load_status, WaveStatus};
