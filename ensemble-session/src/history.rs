//! Merge-history log: `<main>/.ensemble/merge-history.json`.
//!
//! An Atomic Store document, appended through read-modify-write and capped
//! at [`HISTORY_CAP`] entries (oldest dropped first).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ensemble_core::{DocumentStore, JsonFileStore, Layout, SessionId};

use crate::error::SessionError;
use crate::merge::MergeStrategy;

pub const HISTORY_CAP: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session_id: SessionId,
    pub branch: String,
    pub target_branch: String,
    pub strategy: MergeStrategy,
    pub commits_count: u32,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// On-disk document; entries are stored oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeHistory {
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

pub struct HistoryLog<S = JsonFileStore<MergeHistory>> {
    store: S,
}

impl HistoryLog<JsonFileStore<MergeHistory>> {
    pub fn open(layout: &Layout) -> Self {
        Self {
            store: JsonFileStore::new(layout.history_path()),
        }
    }
}

impl<S: DocumentStore<MergeHistory>> HistoryLog<S> {
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    pub fn append(&self, entry: HistoryEntry) -> Result<(), SessionError> {
        self.store.read_modify_write(|doc: &mut MergeHistory| {
            doc.entries.push(entry);
            let overflow = doc.entries.len().saturating_sub(HISTORY_CAP);
            if overflow > 0 {
                doc.entries.drain(..overflow);
            }
            Ok::<_, SessionError>(())
        })
    }

    /// Newest first; `None` returns everything.
    pub fn recent(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, SessionError> {
        let doc = self.store.load()?;
        let take = limit.unwrap_or(doc.entries.len());
        Ok(doc.entries.into_iter().rev().take(take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::MemoryStore;

    fn entry(n: u64) -> HistoryEntry {
        HistoryEntry {
            session_id: SessionId(n),
            branch: format!("feat/{n}"),
            target_branch: "main".to_string(),
            strategy: MergeStrategy::Squash,
            commits_count: 1,
            timestamp: Utc::now(),
            success: true,
        }
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let log = HistoryLog::with_store(MemoryStore::<MergeHistory>::default());
        for n in 1..=4 {
            log.append(entry(n)).expect("append");
        }
        let ids: Vec<u64> = log
            .recent(Some(2))
            .expect("recent")
            .iter()
            .map(|e| e.session_id.0)
            .collect();
        assert_eq!(ids, vec![4, 3]);
        assert_eq!(log.recent(None).expect("all").len(), 4);
    }

    #[test]
    fn log_is_capped() {
        let log = HistoryLog::with_store(MemoryStore::<MergeHistory>::default());
        for n in 0..(HISTORY_CAP as u64 + 3) {
            log.append(entry(n)).expect("append");
        }
        let all = log.recent(None).expect("all");
        assert_eq!(all.len(), HISTORY_CAP);
        assert_eq!(all.last().map(|e| e.session_id.0), Some(3));
    }

    #[test]
    fn entry_uses_camel_case_fields() {
        let json = serde_json::to_value(entry(1)).expect("json");
        assert_eq!(json["sessionId"], 1);
        assert_eq!(json["targetBranch"], "main");
        assert_eq!(json["commitsCount"], 1);
        assert_eq!(json["strategy"], "squash");
    }
}
