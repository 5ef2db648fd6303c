//! Per-worktree session state document (`.ensemble/state.json`).
//!
//! Other tools write their own keys into the same document; anything this
//! crate does not model is carried through `extra` untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ensemble_core::TeamMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Present only while a team is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_team: Option<ActiveTeam>,
    #[serde(default)]
    pub team_metrics: TeamMetrics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTeam {
    pub template: String,
    pub mode: TeamMode,
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub teammates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMetrics {
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub teams_completed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_trace_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionState {
    pub fn is_team_active(&self) -> bool {
        self.active_team.is_some()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.active_team.as_ref().map(|t| t.trace_id.as_str())
    }
}

impl TeamMetrics {
    /// Fold one finished run into the running totals.
    pub fn record_completion(
        &mut self,
        team: &ActiveTeam,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        self.tasks_completed += team.teammates as u64;
        self.teams_completed += 1;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some(duration_ms);
        self.last_trace_id = Some(team.trace_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = r#"{"team_metrics":{"tasks_completed":3},"hook":{"last":"Edit"},"phase":"build"}"#;
        let state: SessionState = serde_json::from_str(raw).expect("parse");
        assert!(!state.is_team_active());
        assert_eq!(state.team_metrics.tasks_completed, 3);
        assert_eq!(state.extra["phase"], "build");

        let back = serde_json::to_value(&state).expect("serialize");
        assert_eq!(back["hook"]["last"], "Edit");
        assert!(back.get("active_team").is_none());
    }

    #[test]
    fn unknown_metric_keys_survive_recording() {
        let raw = r#"{"team_metrics":{"teams_completed":1,"custom_score":9}}"#;
        let mut state: SessionState = serde_json::from_str(raw).expect("parse");
        let team = ActiveTeam {
            template: "review".to_string(),
            mode: TeamMode::Native,
            trace_id: "t-1".to_string(),
            started_at: Utc::now(),
            teammates: 2,
        };
        state.team_metrics.record_completion(&team, Utc::now(), 10);

        let back = serde_json::to_value(&state).expect("serialize");
        assert_eq!(back["team_metrics"]["custom_score"], 9);
        assert_eq!(back["team_metrics"]["teams_completed"], 2);
        assert_eq!(back["team_metrics"]["tasks_completed"], 2);
    }

    #[test]
    fn empty_document_is_idle() {
        let state: SessionState = serde_json::from_str("{}").expect("parse");
        assert_eq!(state, SessionState::default());
        assert!(state.trace_id().is_none());
    }
}
