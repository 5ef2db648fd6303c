//! `<wave>/status.json`: which analyzers have finished, and how.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ensemble_core::{DocumentStore, JsonFileStore};

use crate::error::WaveError;
use crate::plan::WavePlan;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveStatus {
    pub audit_type: String,
    pub analyzers: Vec<String>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stagger_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

impl WaveStatus {
    /// Record `key` as done. A late sentinel moves a key out of `failed`.
    pub fn mark_completed(&mut self, key: &str) {
        self.failed.retain(|k| k != key);
        if !self.completed.iter().any(|k| k == key) {
            self.completed.push(key.to_string());
        }
    }

    /// Record `key` as failed unless it already completed.
    pub fn mark_failed(&mut self, key: &str) {
        if self.completed.iter().any(|k| k == key) || self.failed.iter().any(|k| k == key) {
            return;
        }
        self.failed.push(key.to_string());
    }

    pub fn pending(&self) -> Vec<&str> {
        self.analyzers
            .iter()
            .filter(|k| !self.completed.contains(k) && !self.failed.contains(k))
            .map(String::as_str)
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.pending().is_empty()
    }
}

pub type StatusStore = JsonFileStore<WaveStatus>;

pub fn status_store(plan: &WavePlan) -> StatusStore {
    JsonFileStore::new(plan.status_path())
}

/// Load the status document of a planned wave; `None` if the wave never ran.
pub fn load_status(plan: &WavePlan) -> Result<Option<WaveStatus>, WaveError> {
    if !plan.status_path().is_file() {
        return Ok(None);
    }
    Ok(Some(status_store(plan).load_fresh()?))
}

/// Apply `update` through the store on the blocking pool, logging instead
/// of failing.
pub(crate) async fn update_status<F>(store: &Arc<StatusStore>, update: F)
where
    F: FnOnce(&mut WaveStatus) + Send + 'static,
{
    let store = Arc::clone(store);
    let joined = tokio::task::spawn_blocking(move || {
        store
            .read_modify_write(|status| {
                update(status);
                Ok::<_, WaveError>(())
            })
            .map_err(|err| (store.path().to_path_buf(), err))
    })
    .await;
    match joined {
        Ok(Ok(())) => {}
        Ok(Err((path, err))) => {
            tracing::warn!(path = %path.display(), error = %err, "wave status update failed")
        }
        Err(err) => tracing::error!(error = %err, "wave status update task failed"),
    }
}
