//! Append-only event log (`events.jsonl`).
//!
//! One JSON object per line. Records are never rewritten; consumers tail or
//! replay. Emitting is best-effort: [`EventSink::emit`] cannot fail, and
//! write errors are only logged.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{io_err, StoreError};

pub const TEAM_CREATED: &str = "team_created";
pub const TEAM_STOPPED: &str = "team_stopped";
pub const TEAM_COMPLETED: &str = "team_completed";
pub const TOOL_INVOKED: &str = "tool_invoked";
pub const SESSION_CREATED: &str = "session_created";
pub const SESSION_MERGED: &str = "session_merged";
pub const SESSION_DELETED: &str = "session_deleted";
pub const WAVE_STARTED: &str = "wave_started";
pub const WAVE_FINISHED: &str = "wave_finished";

/// One structured event. Type-specific fields live in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            trace_id: None,
            template: None,
            mode: None,
            duration_ms: None,
            fields: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn mode(mut self, mode: impl ToString) -> Self {
        self.mode = Some(mode.to_string());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Fire-and-forget event destination.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// NDJSON file sink. Each record is a single `write_all` on an append-mode
/// handle, so concurrent writers interleave whole lines.
#[derive(Debug, Clone)]
pub struct JsonlEventBus {
    path: PathBuf,
}

impl JsonlEventBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, surfacing errors. [`EventSink::emit`] swallows them.
    pub fn append(&self, record: &EventRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(&self.path, e))
    }
}

impl EventSink for JsonlEventBus {
    fn emit(&self, record: EventRecord) {
        if let Err(err) = self.append(&record) {
            tracing::warn!(
                event = %record.kind,
                trace_id = record.trace_id.as_deref().unwrap_or("-"),
                error = %err,
                "event write failed; continuing",
            );
        }
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for MemoryEventBus {
    fn emit(&self, record: EventRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventBus;

impl EventSink for NullEventBus {
    fn emit(&self, _record: EventRecord) {}
}

/// Read every record in order. Malformed lines are skipped with a warning.
pub fn replay(path: &Path) -> Result<Vec<EventRecord>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(path, err)),
    };
    let mut records = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(line = n + 1, error = %err, "skipping malformed event line");
            }
        }
    }
    Ok(records)
}

/// Aggregate view over a replayed log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub total: usize,
    pub teams_created: usize,
    pub teams_completed: usize,
    pub tool_invocations: usize,
    pub sessions_merged: usize,
    pub team_duration_ms: u64,
    pub by_template: BTreeMap<String, usize>,
}

pub fn summarize(records: &[EventRecord]) -> EventSummary {
    let mut summary = EventSummary {
        total: records.len(),
        ..EventSummary::default()
    };
    for record in records {
        match record.kind.as_str() {
            TEAM_CREATED => {
                summary.teams_created += 1;
                if let Some(template) = &record.template {
                    *summary.by_template.entry(template.clone()).or_default() += 1;
                }
            }
            TEAM_COMPLETED => {
                summary.teams_completed += 1;
                summary.team_duration_ms += record.duration_ms.unwrap_or(0);
            }
            TOOL_INVOKED => summary.tool_invocations += 1,
            SESSION_MERGED => summary.sessions_merged += 1,
            _ => {}
        }
    }
    summary
}
