//! Wave planning: one isolated task per analyzer, each naming its sentinel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ensemble_core::store::{read_document, write_atomic};

use crate::error::WaveError;

pub const PLAN_FILE: &str = "plan.json";
pub const WAVE_STATUS_FILE: &str = "status.json";
pub const SENTINEL_SUFFIX: &str = ".findings.json";

/// Reduce an analyzer name to `[A-Za-z0-9_-]`, collapsing other runs to `-`.
pub fn sanitize_key(analyzer: &str) -> Option<String> {
    let mut key = String::with_capacity(analyzer.len());
    for c in analyzer.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            key.push(c);
        } else if !key.ends_with('-') {
            key.push('-');
        }
    }
    let key = key.trim_matches('-').to_string();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerTask {
    /// Name as given by the caller.
    pub analyzer: String,
    /// Sanitized name; used for every file the task touches.
    pub key: String,
    pub sentinel: PathBuf,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlan {
    pub trace_id: String,
    pub audit_type: String,
    pub target: String,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<AnalyzerTask>,
}

impl WavePlan {
    pub fn keys(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.key.clone()).collect()
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(WAVE_STATUS_FILE)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.dir.join(PLAN_FILE)
    }

    pub fn task(&self, key: &str) -> Option<&AnalyzerTask> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// Persist as `<dir>/plan.json` so a later process can run or collect.
    pub fn save(&self) -> Result<(), WaveError> {
        write_atomic(&self.plan_path(), self)?;
        Ok(())
    }

    /// Load `<dir>/plan.json`.
    pub fn open(dir: &Path) -> Result<Self, WaveError> {
        let path = dir.join(PLAN_FILE);
        if !path.is_file() {
            return Err(WaveError::PlanNotFound(path));
        }
        let plan: Option<WavePlan> = read_document(&path)?;
        plan.ok_or(WaveError::PlanNotFound(path))
    }
}

/// Build the plan under `<waves_dir>/<trace_id>/`. Nothing is written.
pub fn plan_wave(
    waves_dir: &Path,
    analyzers: &[String],
    target: &str,
    audit_type: &str,
) -> Result<WavePlan, WaveError> {
    if analyzers.is_empty() {
        return Err(WaveError::NoAnalyzers);
    }
    let trace_id = Uuid::new_v4().to_string();
    let dir = waves_dir.join(&trace_id);

    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    let mut tasks = Vec::with_capacity(analyzers.len());
    for analyzer in analyzers {
        let key = sanitize_key(analyzer).ok_or_else(|| WaveError::InvalidAnalyzer(analyzer.clone()))?;
        if let Some(first) = seen.insert(key.clone(), analyzer.as_str()) {
            return Err(WaveError::DuplicateAnalyzer {
                first: first.to_string(),
                second: analyzer.clone(),
                key,
            });
        }
        let sentinel = dir.join(format!("{key}{SENTINEL_SUFFIX}"));
        let prompt = task_prompt(analyzer, &key, &sentinel, target, audit_type);
        tasks.push(AnalyzerTask {
            analyzer: analyzer.clone(),
            key,
            sentinel,
            prompt,
        });
    }

    Ok(WavePlan {
        trace_id,
        audit_type: audit_type.to_string(),
        target: target.to_string(),
        dir,
        created_at: Utc::now(),
        tasks,
    })
}

fn task_prompt(analyzer: &str, key: &str, sentinel: &Path, target: &str, audit_type: &str) -> String {
    format!(
        "\
# {audit_type} audit: {analyzer}

Your role: coordinator dispatching to one specialist sub-task.
Hand the \"{analyzer}\" analysis of `{target}` to a single sub-agent and wait
for it. Do not analyze the code yourself and do not start other sub-tasks.

When the sub-task is done, write its results exactly once to:

    {sentinel}

Write nothing else to that path, and write it only when every finding is known.
Other analyzers run in parallel; do not touch their files.

Required output (JSON):

{{
  \"analyzer\": \"{key}\",
  \"findings\": [
    {{
      \"id\": \"{key}-1\",
      \"severity\": \"critical | high | medium | low | info\",
      \"title\": \"short summary\",
      \"file\": \"optional/path.rs\",
      \"line\": 42,
      \"detail\": \"optional explanation\"
    }}
  ]
}}

An empty `findings` array is a valid result.
",
        sentinel = sentinel.display(),
    )
}
