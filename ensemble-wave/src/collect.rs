//! Reading analyzer findings back out of a wave directory.

use std::collections::BTreeMap;
use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plan::WavePlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: String,
    pub title: String,
    /// `file`, `line`, `detail` and anything else the analyzer reports.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FindingsFile {
    #[serde(default)]
    analyzer: Option<String>,
    findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerResult {
    pub analyzer: String,
    pub findings: Vec<Finding>,
    /// The sentinel exists but could not be read or parsed.
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One entry per sentinel that exists, in plan order. Missing sentinels are
/// omitted; malformed ones yield `error: true` with no findings.
pub fn collect_results(plan: &WavePlan) -> Vec<AnalyzerResult> {
    let mut results = Vec::new();
    for task in &plan.tasks {
        let contents = match std::fs::read_to_string(&task.sentinel) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                results.push(malformed(&task.key, format!("read failed: {err}")));
                continue;
            }
        };
        match serde_json::from_str::<FindingsFile>(&contents) {
            Ok(file) => {
                if let Some(named) = file.analyzer.as_deref().filter(|n| *n != task.key) {
                    tracing::debug!(expected = %task.key, reported = named, "sentinel names a different analyzer");
                }
                results.push(AnalyzerResult {
                    analyzer: task.key.clone(),
                    findings: file.findings,
                    error: false,
                    error_message: None,
                });
            }
            Err(err) => {
                tracing::warn!(analyzer = %task.key, error = %err, "malformed findings file");
                results.push(malformed(&task.key, err.to_string()));
            }
        }
    }
    results
}

fn malformed(key: &str, message: String) -> AnalyzerResult {
    AnalyzerResult {
        analyzer: key.to_string(),
        findings: Vec::new(),
        error: true,
        error_message: Some(message),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaveSummary {
    pub expected: usize,
    pub reported: usize,
    pub malformed: usize,
    pub findings: usize,
    pub by_severity: BTreeMap<String, usize>,
}

pub fn summarize(plan: &WavePlan, results: &[AnalyzerResult]) -> WaveSummary {
    let mut summary = WaveSummary {
        expected: plan.tasks.len(),
        reported: results.len(),
        malformed: results.iter().filter(|r| r.error).count(),
        ..WaveSummary::default()
    };
    for finding in results.iter().flat_map(|r| &r.findings) {
        summary.findings += 1;
        *summary
            .by_severity
            .entry(finding.severity.to_ascii_lowercase())
            .or_default() += 1;
    }
    summary
}
