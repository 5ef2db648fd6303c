//! Session lifecycle: create, switch, end, spawn, delete, status.
//!
//! [`LifecycleManager`] binds one repository's registry, config, merge
//! history, event log and multiplexer probe. All git work runs in the main
//! worktree (or the session's own worktree for status checks).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use ensemble_core::events::{self, EventRecord, EventSink, JsonlEventBus};
use ensemble_core::{
    git, lockfile, Layout, NewSession, ProjectConfig, Session, SessionId, SessionRegistry,
    ThreadType,
};

use crate::cleanup::{self, CleanupReport, Confirm, Finding};
use crate::error::SessionError;
use crate::history::{HistoryEntry, HistoryLog};
use crate::merge::{self, IntegrateOptions, MergeReport, MergeStrategy, Mergeability};
use crate::multiplexer::{Multiplexer, TmuxMultiplexer};
use crate::spawn::{self, SpawnRequest};
use crate::validate::{validate_branch, validate_nickname};
use crate::worktree::{self, SharedLink};

/// Environment variable carrying the session ID into the agent process.
pub const SESSION_ID_ENV: &str = "ENSEMBLE_SESSION_ID";

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub branch: String,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedSession {
    pub id: SessionId,
    pub path: PathBuf,
    pub branch: String,
    pub created_branch: bool,
    pub shared: SharedLink,
    pub launch_command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchTarget {
    pub session: Session,
    pub launch_command: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndOptions {
    pub merge: bool,
    pub strategy: MergeStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndOutcome {
    pub session_id: SessionId,
    pub lock_released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeReport>,
    /// Registry entry removed (only after the worktree is gone).
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub session: Session,
    pub thread: ThreadType,
    pub live: bool,
    pub path_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub project_name: String,
    pub main_root: PathBuf,
    pub integration_branch: String,
    pub sessions: Vec<SessionStatus>,
    pub cleaned_locks: usize,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct LifecycleManager {
    registry: SessionRegistry,
    config: ProjectConfig,
    history: HistoryLog,
    events: Arc<dyn EventSink>,
    mux: Box<dyn Multiplexer>,
}

impl LifecycleManager {
    /// Manager for the repository whose main worktree is `main_root`.
    pub fn open(main_root: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let layout = Layout::new(main_root);
        let config = ProjectConfig::load(&layout)?;
        let registry = SessionRegistry::open(layout.main_root())?;
        let history = HistoryLog::open(&layout);
        let events: Arc<dyn EventSink> = Arc::new(JsonlEventBus::new(layout.events_path()));
        let mux: Box<dyn Multiplexer> =
            Box::new(TmuxMultiplexer::new(config.multiplexer_prefix.clone()));
        Ok(Self {
            registry,
            config,
            history,
            events,
            mux,
        })
    }

    /// Locate the repository from any of its worktrees.
    pub fn discover(dir: &Path) -> Result<Self, SessionError> {
        Self::open(git::main_worktree_root(dir)?)
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_multiplexer(mut self, mux: Box<dyn Multiplexer>) -> Self {
        self.mux = mux;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        self.registry.layout()
    }

    /// `cd '<path>' && ENSEMBLE_SESSION_ID=<id> <agent>`
    pub fn launch_command(&self, session: &Session) -> String {
        format!(
            "cd {} && {}={} {}",
            shell_quote(&session.path.to_string_lossy()),
            SESSION_ID_ENV,
            session.id,
            self.config.agent_command
        )
    }

    // -- create / spawn ------------------------------------------------------

    /// Validate, add the worktree, link shared state, register.
    pub fn create_session(&self, request: CreateRequest) -> Result<CreatedSession, SessionError> {
        validate_branch(&request.branch)?;
        if let Some(nick) = &request.nickname {
            validate_nickname(nick)?;
        }

        let layout = self.layout();
        let added = worktree::add(layout, &self.config, &request.branch)?;
        let shared = worktree::link_shared(layout, &added.path)?;
        let path = std::fs::canonicalize(&added.path).unwrap_or_else(|_| added.path.clone());
        let session = self.registry.register_session(NewSession {
            path,
            branch: added.branch.clone(),
            nickname: request.nickname,
            thread_type: ThreadType::Parallel,
        })?;

        self.events.emit(
            EventRecord::new(events::SESSION_CREATED)
                .field("session_id", session.id.0)
                .field("branch", session.branch.clone()),
        );
        tracing::info!("created session {} on {}", session.id, session.branch);
        Ok(CreatedSession {
            id: session.id,
            launch_command: self.launch_command(&session),
            path: session.path,
            branch: session.branch,
            created_branch: added.created_branch,
            shared,
        })
    }

    /// Create several sessions. Every branch is validated before the first
    /// worktree is added.
    pub fn spawn(&self, request: &SpawnRequest) -> Result<Vec<CreatedSession>, SessionError> {
        let main_root = self.layout().main_root().to_path_buf();
        let items = spawn::plan(request, |branch| {
            git::branch_exists(&main_root, branch)
                || worktree::worktree_path(self.layout(), &self.config, branch).exists()
        })?;
        items
            .into_iter()
            .map(|item| {
                self.create_session(CreateRequest {
                    branch: item.branch,
                    nickname: item.nickname,
                })
            })
            .collect()
    }

    // -- switch / end / delete -----------------------------------------------

    pub fn switch(&self, id: SessionId) -> Result<SwitchTarget, SessionError> {
        let session = self.registry.touch(id)?;
        Ok(SwitchTarget {
            launch_command: self.launch_command(&session),
            session,
        })
    }

    /// Release the session's lock and optionally integrate it.
    ///
    /// The registry entry is removed only when integration also removed the
    /// worktree; a refused or conflicted merge leaves the session registered.
    pub fn end(&self, id: SessionId, opts: EndOptions) -> Result<EndOutcome, SessionError> {
        let _session = self.registry.require(id)?;
        let locks = self.layout().locks_dir();
        let lock_released = lockfile::read(&locks, id).is_some();
        lockfile::remove(&locks, id)?;

        let mut outcome = EndOutcome {
            session_id: id,
            lock_released,
            merge: None,
            removed: false,
        };
        if opts.merge {
            let report = self.integrate_session(
                id,
                IntegrateOptions {
                    strategy: opts.strategy,
                    delete_branch: true,
                    delete_worktree: true,
                },
            )?;
            if report.success && report.worktree_removed {
                self.registry.delete(id, false)?;
                outcome.removed = true;
            }
            outcome.merge = Some(report);
        }
        Ok(outcome)
    }

    pub fn delete(&self, id: SessionId, with_worktree: bool) -> Result<Session, SessionError> {
        let outcome = self.registry.delete(id, with_worktree)?;
        self.events.emit(
            EventRecord::new(events::SESSION_DELETED)
                .field("session_id", id.0)
                .field("worktree_removed", outcome.worktree_removed),
        );
        Ok(outcome.session)
    }

    // -- merge ---------------------------------------------------------------

    pub fn check_mergeability(&self, id: SessionId) -> Result<Mergeability, SessionError> {
        let session = self.registry.require(id)?;
        merge::check_mergeability(
            self.layout().main_root(),
            &session,
            &self.config.integration_branch,
        )
    }

    /// Integrate into the configured integration branch.
    ///
    /// Attempted merges (successful or not) are appended to the history.
    pub fn integrate_session(
        &self,
        id: SessionId,
        opts: IntegrateOptions,
    ) -> Result<MergeReport, SessionError> {
        let session = self.registry.require(id)?;
        let target = self.config.integration_branch.clone();
        let report = merge::integrate(self.layout().main_root(), &session, &target, opts)?;

        if report.success {
            let now = Utc::now();
            self.registry.mark_merged(id, now)?;
            self.events.emit(
                EventRecord::new(events::SESSION_MERGED)
                    .field("session_id", id.0)
                    .field("branch", report.branch.clone())
                    .field("target_branch", target.clone())
                    .field("strategy", report.strategy.to_string())
                    .field("commits_count", report.commits_count),
            );
        }
        if report.attempted() {
            let entry = HistoryEntry {
                session_id: id,
                branch: report.branch.clone(),
                target_branch: target,
                strategy: report.strategy,
                commits_count: report.commits_count,
                timestamp: Utc::now(),
                success: report.success,
            };
            if let Err(err) = self.history.append(entry) {
                tracing::warn!("merge history append failed: {}", err);
            }
        }
        Ok(report)
    }

    pub fn history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, SessionError> {
        self.history.recent(limit)
    }

    // -- cleanup / status ----------------------------------------------------

    pub fn cleanup_scan(&self) -> Result<Vec<Finding>, SessionError> {
        cleanup::scan(
            &self.registry,
            self.mux.as_ref(),
            self.config.inactivity_days,
            Utc::now(),
        )
    }

    pub fn cleanup_apply(&self, findings: Vec<Finding>, confirm: &mut dyn Confirm) -> CleanupReport {
        cleanup::apply(&self.registry, self.mux.as_ref(), findings, confirm)
    }

    pub fn status(&self) -> Result<StatusReport, SessionError> {
        let listing = self.registry.list()?;
        let locks = self.layout().locks_dir();
        let sessions = listing
            .sessions
            .into_iter()
            .map(|session| SessionStatus {
                thread: session.thread_type(),
                live: lockfile::is_live(&locks, session.id),
                path_exists: session.path.exists(),
                session,
            })
            .collect();
        Ok(StatusReport {
            project_name: self.registry.project_name().to_string(),
            main_root: self.layout().main_root().to_path_buf(),
            integration_branch: self.config.integration_branch.clone(),
            sessions,
            cleaned_locks: listing.cleaned,
        })
    }
}

/// Single-quote for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
