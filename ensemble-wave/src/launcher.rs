//! Starting one analyzer worker.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use ensemble_core::ProjectConfig;

use crate::error::{io_err, WaveError};
use crate::plan::AnalyzerTask;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerExit {
    pub success: bool,
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
        }
    }

    pub fn failed(code: Option<i32>) -> Self {
        Self {
            success: false,
            code,
        }
    }
}

/// Runs one analyzer task to completion.
///
/// The runner may drop the returned future once the task's sentinel exists;
/// implementations must tolerate that.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn run(&self, task: &AnalyzerTask) -> Result<WorkerExit, WaveError>;
}

/// Spawns an argv template per task. `{prompt}`, `{sentinel}`, `{analyzer}`
/// and `{key}` are substituted in every argument. Output goes to
/// `<wave>/<key>.log`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    argv: Vec<String>,
    cwd: PathBuf,
}

impl CommandLauncher {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>) -> Result<Self, WaveError> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(WaveError::EmptyWorkerCommand);
        }
        Ok(Self {
            argv,
            cwd: cwd.into(),
        })
    }

    /// `wave.worker_command`, else `<agent_command> -p {prompt}`.
    pub fn from_config(config: &ProjectConfig, cwd: impl Into<PathBuf>) -> Result<Self, WaveError> {
        let argv = config.wave.worker_command.clone().unwrap_or_else(|| {
            vec![
                config.agent_command.clone(),
                "-p".to_string(),
                "{prompt}".to_string(),
            ]
        });
        Self::new(argv, cwd)
    }

    pub fn argv_for(&self, task: &AnalyzerTask) -> Vec<String> {
        let sentinel = task.sentinel.display().to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{prompt}", &task.prompt)
                    .replace("{sentinel}", &sentinel)
                    .replace("{analyzer}", &task.analyzer)
                    .replace("{key}", &task.key)
            })
            .collect()
    }
}

fn log_path(task: &AnalyzerTask) -> Option<PathBuf> {
    let dir = task.sentinel.parent()?;
    Some(dir.join(format!("{}.log", task.key)))
}

fn open_log(path: &Path) -> Result<(Stdio, Stdio), WaveError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let out = File::create(path).map_err(|e| io_err(path, e))?;
    let err = out.try_clone().map_err(|e| io_err(path, e))?;
    Ok((Stdio::from(out), Stdio::from(err)))
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn run(&self, task: &AnalyzerTask) -> Result<WorkerExit, WaveError> {
        let argv = self.argv_for(task);
        let Some((program, args)) = argv.split_first() else {
            return Err(WaveError::EmptyWorkerCommand);
        };
        let (stdout, stderr) = match log_path(task) {
            Some(path) => open_log(&path)?,
            None => (Stdio::null(), Stdio::null()),
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        let mut child = command.spawn().map_err(|source| WaveError::Launch {
            analyzer: task.analyzer.clone(),
            source,
        })?;
        tracing::debug!(analyzer = %task.key, pid = ?child.id(), "worker spawned");

        let status = child.wait().await.map_err(|source| WaveError::Launch {
            analyzer: task.analyzer.clone(),
            source,
        })?;
        Ok(if status.success() {
            WorkerExit::ok()
        } else {
            WorkerExit::failed(status.code())
        })
    }
}
