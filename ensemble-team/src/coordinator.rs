//! Team lifecycle: `idle -> active -> idle`.
//!
//! Team state lives in the worktree's session state document and is only
//! mutated inside `read_modify_write`. Events are emitted after the state
//! commit; an event failure never undoes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use ensemble_core::events::{TEAM_COMPLETED, TEAM_CREATED, TEAM_STOPPED, TOOL_INVOKED};
use ensemble_core::paths::session_state_path;
use ensemble_core::{
    git, DocumentStore, EventRecord, EventSink, JsonFileStore, JsonlEventBus, Layout,
    ProjectConfig, TeamMode,
};

use crate::error::TeamError;
use crate::payload::{
    build_native_team_payload, build_subagent_payload, NativeTeamPayload, SubagentPayload,
};
use crate::prompt::PromptRenderer;
use crate::state::{ActiveTeam, SessionState, TeamMetrics};
use crate::template::TemplateSet;

/// Environment override for the execution mode (`native` | `subagent`).
pub const TEAM_MODE_ENV: &str = "ENSEMBLE_TEAM_MODE";

// ---------------------------------------------------------------------------
// Mode selection
// ---------------------------------------------------------------------------

/// Source of the current execution mode, consulted on every `start_team`.
pub trait ModeProvider: Send + Sync {
    fn current(&self) -> TeamMode;
}

impl ModeProvider for TeamMode {
    fn current(&self) -> TeamMode {
        *self
    }
}

/// Reads [`TEAM_MODE_ENV`] per call; unset or unparseable falls back to the
/// configured mode.
#[derive(Debug, Clone, Copy)]
pub struct EnvModeProvider {
    fallback: TeamMode,
}

impl EnvModeProvider {
    pub fn new(fallback: TeamMode) -> Self {
        Self { fallback }
    }
}

impl ModeProvider for EnvModeProvider {
    fn current(&self) -> TeamMode {
        match std::env::var(TEAM_MODE_ENV) {
            Ok(raw) if !raw.trim().is_empty() => raw.parse().unwrap_or_else(|err: String| {
                tracing::warn!(error = %err, fallback = %self.fallback, "ignoring {TEAM_MODE_ENV}");
                self.fallback
            }),
            _ => self.fallback,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TeamStartReport {
    pub template: String,
    pub team_name: String,
    pub mode: TeamMode,
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    pub teammate_count: usize,
    /// `null` in subagent mode.
    pub native_payload: Option<NativeTeamPayload>,
    pub subagent_payload: Option<SubagentPayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamStopReport {
    pub template: String,
    pub mode: TeamMode,
    pub trace_id: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub metrics: TeamMetrics,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct TeamCoordinator<S = JsonFileStore<SessionState>> {
    root: PathBuf,
    store: S,
    events: Arc<dyn EventSink>,
    templates: TemplateSet,
    prompts: PromptRenderer,
    mode: Box<dyn ModeProvider>,
}

impl TeamCoordinator {
    /// Coordinator for the worktree at `root_dir`. Templates, config and the
    /// event log come from the main worktree; state is per worktree.
    pub fn open(root_dir: &Path) -> Result<Self, TeamError> {
        let main = git::main_worktree_root(root_dir).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "not a git worktree; using {} as main", root_dir.display());
            root_dir.to_path_buf()
        });
        let layout = Layout::new(main);
        let config = ProjectConfig::load(&layout)?;
        let templates = TemplateSet::load(&layout.teams_dir())?;
        Self::with_parts(
            root_dir,
            JsonFileStore::new(session_state_path(root_dir)),
            Arc::new(JsonlEventBus::new(layout.events_path())),
            templates,
            Box::new(EnvModeProvider::new(config.team.mode)),
        )
    }
}

impl<S: DocumentStore<SessionState>> TeamCoordinator<S> {
    pub fn with_parts(
        root_dir: &Path,
        store: S,
        events: Arc<dyn EventSink>,
        templates: TemplateSet,
        mode: Box<dyn ModeProvider>,
    ) -> Result<Self, TeamError> {
        Ok(Self {
            root: root_dir.to_path_buf(),
            store,
            events,
            templates,
            prompts: PromptRenderer::new()?,
            mode,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mode(&self) -> TeamMode {
        self.mode.current()
    }

    /// Committed state, bypassing any cache.
    pub fn state(&self) -> Result<SessionState, TeamError> {
        Ok(self.store.load_fresh()?)
    }

    /// `idle -> active`. Rejected with [`TeamError::TeamAlreadyActive`] if a
    /// team is already running in this worktree.
    pub fn start_team(&self, template_name: &str) -> Result<TeamStartReport, TeamError> {
        let template = self.templates.resolve(template_name)?;
        let mode = self.mode.current();
        let team_name = template.name_or(template_name).to_string();

        let (native_payload, subagent_payload) = match mode {
            TeamMode::Native => (
                Some(build_native_team_payload(template, template_name, &self.prompts)?),
                None,
            ),
            TeamMode::Subagent => (
                None,
                Some(build_subagent_payload(template, template_name, &self.prompts)?),
            ),
        };

        let active = ActiveTeam {
            template: template_name.to_string(),
            mode,
            trace_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            teammates: template.teammates.len(),
        };
        self.store.read_modify_write(|state| {
            if let Some(existing) = &state.active_team {
                return Err(TeamError::TeamAlreadyActive {
                    template: existing.template.clone(),
                    trace_id: existing.trace_id.clone(),
                });
            }
            state.active_team = Some(active.clone());
            Ok(())
        })?;

        self.events.emit(
            EventRecord::new(TEAM_CREATED)
                .trace(&active.trace_id)
                .template(&active.template)
                .mode(mode)
                .field("team_name", team_name.as_str())
                .field("teammates", active.teammates),
        );
        tracing::info!(
            template = %active.template,
            mode = %mode,
            trace_id = %active.trace_id,
            teammates = active.teammates,
            "team started",
        );

        Ok(TeamStartReport {
            template: active.template,
            team_name,
            mode,
            trace_id: active.trace_id,
            started_at: active.started_at,
            teammate_count: active.teammates,
            native_payload,
            subagent_payload,
        })
    }

    /// `active -> idle`. Clears `active_team` and folds the run into
    /// `team_metrics`; every other key in the document is preserved.
    pub fn stop_team(&self) -> Result<TeamStopReport, TeamError> {
        let now = Utc::now();
        let (team, duration_ms, metrics) = self.store.read_modify_write(|state| {
            let team = state.active_team.take().ok_or(TeamError::NoActiveTeam)?;
            let duration_ms = u64::try_from((now - team.started_at).num_milliseconds()).unwrap_or(0);
            state.team_metrics.record_completion(&team, now, duration_ms);
            Ok::<_, TeamError>((team, duration_ms, state.team_metrics.clone()))
        })?;

        for kind in [TEAM_STOPPED, TEAM_COMPLETED] {
            self.events.emit(
                EventRecord::new(kind)
                    .trace(&team.trace_id)
                    .template(&team.template)
                    .mode(team.mode)
                    .duration_ms(duration_ms)
                    .field("teammates", team.teammates),
            );
        }
        tracing::info!(
            template = %team.template,
            trace_id = %team.trace_id,
            duration_ms,
            "team stopped",
        );

        Ok(TeamStopReport {
            template: team.template,
            mode: team.mode,
            trace_id: team.trace_id,
            duration_ms,
            completed_at: now,
            metrics,
        })
    }

    /// Hook-observer entry point: log a tool call against the running team's
    /// trace, if any.
    pub fn record_tool_invocation(&self, tool: &str) -> Result<EventRecord, TeamError> {
        let state = self.state()?;
        let mut record = EventRecord::new(TOOL_INVOKED).field("tool", tool);
        if let Some(team) = &state.active_team {
            record = record.trace(&team.trace_id).template(&team.template);
        }
        self.events.emit(record.clone());
        Ok(record)
    }
}
