//! Session registry: the canonical list of sessions for one repository.
//!
//! # Storage layout
//!
//! ```text
//! <main>/.ensemble/
//!   registry.json         (Registry document, JsonFileStore)
//!   registry.json.lock    (advisory lock for read-modify-write)
//!   locks/session-<id>.lock
//! ```
//!
//! # Mutation rule
//!
//! Every change goes through [`DocumentStore::read_modify_write`]. Preconditions
//! (main session, current thread type) are re-checked inside the update
//! closure, against the freshest committed document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ProjectConfig;
use crate::error::RegistryError;
use crate::git;
use crate::lockfile;
use crate::paths::Layout;
use crate::store::{DocumentStore, JsonFileStore};
use crate::types::{Registry, Session, SessionId, ThreadType};

/// Branch recorded when the caller's branch cannot be determined.
pub const UNKNOWN_BRANCH: &str = "HEAD";

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub id: SessionId,
    pub is_new: bool,
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListing {
    /// Sorted by numeric ID, ascending.
    pub sessions: Vec<Session>,
    /// Dead-owner lock files removed while listing.
    pub cleaned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub session: Session,
    pub worktree_removed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionOptions {
    /// Apply a transition that is absent from the table.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub id: SessionId,
    pub from: ThreadType,
    pub to: ThreadType,
    pub noop: bool,
    pub forced: bool,
}

/// Input for sessions created on behalf of another worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub path: PathBuf,
    pub branch: String,
    pub nickname: Option<String>,
    pub thread_type: ThreadType,
}

// ---------------------------------------------------------------------------
// Registry handle
// ---------------------------------------------------------------------------

/// Registry operations over an injectable [`DocumentStore`].
pub struct SessionRegistry<S = JsonFileStore<Registry>> {
    layout: Layout,
    store: S,
    project_name: String,
}

impl SessionRegistry<JsonFileStore<Registry>> {
    /// Registry for the repository whose main worktree is `main_root`.
    pub fn open(main_root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let layout = Layout::new(main_root);
        let config = ProjectConfig::load(&layout)?;
        let project_name = config.project_name(&layout);
        let store = JsonFileStore::new(layout.registry_path());
        Ok(Self {
            layout,
            store,
            project_name,
        })
    }

    /// Locate the main worktree from any worktree of the repository at `dir`.
    pub fn discover(dir: &Path) -> Result<Self, RegistryError> {
        let main_root = git::main_worktree_root(dir)?;
        Self::open(main_root)
    }
}

impl<S: DocumentStore<Registry>> SessionRegistry<S> {
    pub fn with_store(layout: Layout, store: S) -> Self {
        let project_name = layout.default_project_name();
        Self {
            layout,
            store,
            project_name,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Current document (may be served from the store cache).
    pub fn load(&self) -> Result<Registry, RegistryError> {
        Ok(self.store.load()?)
    }

    /// Register the session whose worktree is `cwd`.
    ///
    /// A session already recorded at `cwd` keeps its ID (`is_new = false`);
    /// otherwise `next_id` is allocated. The caller's lock file is refreshed
    /// either way.
    pub fn register(
        &self,
        cwd: &Path,
        nickname: Option<&str>,
    ) -> Result<Registration, RegistryError> {
        let cwd = normalize(cwd);
        let main_root = normalize(self.layout.main_root());
        let branch = git::current_branch(&cwd).unwrap_or_else(|err| {
            tracing::debug!(path = %cwd.display(), error = %err, "branch lookup failed");
            UNKNOWN_BRANCH.to_string()
        });
        let project_name = self.project_name.clone();

        let registration = self.store.read_modify_write(|reg: &mut Registry| {
            if reg.project_name.is_empty() {
                reg.project_name = project_name;
            }
            let now = Utc::now();
            let existing = reg.find_by_path(&cwd).map(|s| s.id);
            if let Some(id) = existing {
                let session = reg
                    .sessions
                    .get_mut(&id)
                    .ok_or(RegistryError::SessionNotFound(id))?;
                session.last_active = now;
                if session.nickname.is_none() {
                    session.nickname = nickname.map(str::to_string);
                }
                let session = session.clone();
                reg.updated = now;
                return Ok::<_, RegistryError>(Registration {
                    id,
                    is_new: false,
                    session,
                });
            }

            let is_main = cwd == main_root && reg.main_session().is_none();
            let id = reg.allocate_id();
            let session = Session {
                id,
                path: cwd.clone(),
                branch,
                nickname: nickname.map(str::to_string),
                is_main,
                thread_type: Some(if is_main {
                    ThreadType::Base
                } else {
                    ThreadType::Parallel
                }),
                created: now,
                last_active: now,
                merged_at: None,
            };
            reg.sessions.insert(id, session.clone());
            reg.updated = now;
            Ok(Registration {
                id,
                is_new: true,
                session,
            })
        })?;

        if let Err(err) = lockfile::write(&self.layout.locks_dir(), registration.id) {
            tracing::warn!(session_id = %registration.id, error = %err, "failed to write session lock");
        }
        if registration.is_new {
            tracing::info!(
                session_id = %registration.id,
                path = %registration.session.path.display(),
                "registered session"
            );
        }
        Ok(registration)
    }

    /// Record a session for a worktree created by this process on someone
    /// else's behalf. No lock file is written; the session's own process does
    /// that when it registers.
    ///
    /// A registry without a main session gets the main worktree recorded as
    /// its `base` session first, in the same update.
    pub fn register_session(&self, new: NewSession) -> Result<Session, RegistryError> {
        let project_name = self.project_name.clone();
        let main_root = normalize(self.layout.main_root());
        let main_branch = git::current_branch(&main_root).unwrap_or_else(|err| {
            tracing::debug!(path = %main_root.display(), error = %err, "branch lookup failed");
            UNKNOWN_BRANCH.to_string()
        });
        self.store.read_modify_write(|reg: &mut Registry| {
            if reg.project_name.is_empty() {
                reg.project_name = project_name;
            }
            if let Some(existing) = reg.find_by_path(&new.path) {
                return Ok::<_, RegistryError>(existing.clone());
            }
            let now = Utc::now();
            let is_main = reg.main_session().is_none() && new.path == main_root;
            if reg.main_session().is_none() && !is_main {
                insert_main(reg, main_root, main_branch, now);
            }
            let id = reg.allocate_id();
            let session = Session {
                id,
                path: new.path,
                branch: new.branch,
                nickname: new.nickname,
                is_main,
                thread_type: Some(if is_main {
                    ThreadType::Base
                } else {
                    new.thread_type
                }),
                created: now,
                last_active: now,
                merged_at: None,
            };
            reg.sessions.insert(id, session.clone());
            reg.updated = now;
            Ok(session)
        })
    }

    /// All sessions by ascending ID. Reaps lock files whose pid is gone.
    pub fn list(&self) -> Result<SessionListing, RegistryError> {
        let cleaned = lockfile::reap_dead(&self.layout.locks_dir())?;
        let reg = self.store.load()?;
        // BTreeMap iteration is already ordered by SessionId.
        let sessions = reg.sessions.into_values().collect();
        Ok(SessionListing { sessions, cleaned })
    }

    pub fn get(&self, id: SessionId) -> Result<Option<Session>, RegistryError> {
        Ok(self.store.load()?.sessions.get(&id).cloned())
    }

    /// Like [`get`](Self::get) but a missing session is an error.
    pub fn require(&self, id: SessionId) -> Result<Session, RegistryError> {
        self.get(id)?.ok_or(RegistryError::SessionNotFound(id))
    }

    pub fn find_by_path(&self, path: &Path) -> Result<Option<Session>, RegistryError> {
        let path = normalize(path);
        Ok(self.store.load()?.find_by_path(&path).cloned())
    }

    pub fn main_session(&self) -> Result<Option<Session>, RegistryError> {
        Ok(self.store.load()?.main_session().cloned())
    }

    /// Bump `last_active` to now.
    pub fn touch(&self, id: SessionId) -> Result<Session, RegistryError> {
        self.update_session(id, |s| s.last_active = Utc::now())
    }

    /// Stamp `merged_at` (and `last_active`).
    pub fn mark_merged(&self, id: SessionId, at: DateTime<Utc>) -> Result<Session, RegistryError> {
        self.update_session(id, |s| {
            s.merged_at = Some(at);
            s.last_active = at;
        })
    }

    fn update_session<F>(&self, id: SessionId, apply: F) -> Result<Session, RegistryError>
    where
        F: FnOnce(&mut Session),
    {
        self.store.read_modify_write(|reg: &mut Registry| {
            let session = reg
                .sessions
                .get_mut(&id)
                .ok_or(RegistryError::SessionNotFound(id))?;
            apply(session);
            let session = session.clone();
            reg.updated = Utc::now();
            Ok(session)
        })
    }

    /// Remove session `id`, optionally removing its worktree first.
    ///
    /// The main session can never be deleted. When the worktree removal fails
    /// the registry entry is left in place.
    pub fn delete(
        &self,
        id: SessionId,
        also_delete_worktree: bool,
    ) -> Result<DeleteOutcome, RegistryError> {
        let session = self
            .store
            .load_fresh()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or(RegistryError::SessionNotFound(id))?;
        if session.is_main {
            return Err(RegistryError::CannotDeleteMain(id));
        }

        let mut worktree_removed = false;
        if also_delete_worktree && session.path.exists() {
            git::remove_worktree(self.layout.main_root(), &session.path, true)?;
            if let Err(err) = git::prune_worktrees(self.layout.main_root()) {
                tracing::warn!(session_id = %id, error = %err, "worktree prune failed");
            }
            worktree_removed = true;
        }

        let session = self.store.read_modify_write(|reg: &mut Registry| {
            let is_main = reg
                .sessions
                .get(&id)
                .map(|s| s.is_main)
                .ok_or(RegistryError::SessionNotFound(id))?;
            if is_main {
                return Err(RegistryError::CannotDeleteMain(id));
            }
            reg.updated = Utc::now();
            reg.sessions
                .remove(&id)
                .ok_or(RegistryError::SessionNotFound(id))
        })?;

        lockfile::remove(&self.layout.locks_dir(), id)?;
        tracing::info!(session_id = %id, worktree_removed, "deleted session");
        Ok(DeleteOutcome {
            session,
            worktree_removed,
        })
    }

    /// Change a session's thread type, validated against the transition table.
    ///
    /// `target` is parsed first; an unknown name fails even with `force`. A
    /// transition to the current type is a no-op and writes nothing.
    pub fn transition_thread(
        &self,
        id: SessionId,
        target: &str,
        opts: TransitionOptions,
    ) -> Result<TransitionOutcome, RegistryError> {
        let to: ThreadType = target.parse()?;
        let outcome = self.store.read_modify_write(|reg: &mut Registry| {
            let session = reg
                .sessions
                .get_mut(&id)
                .ok_or(RegistryError::SessionNotFound(id))?;
            let from = session.thread_type();
            if from == to {
                return Ok::<_, RegistryError>(TransitionOutcome {
                    id,
                    from,
                    to,
                    noop: true,
                    forced: false,
                });
            }
            let allowed = from.can_transition_to(to);
            if !allowed && !opts.force {
                return Err(RegistryError::InvalidTransition { id, from, to });
            }
            session.thread_type = Some(to);
            reg.updated = Utc::now();
            Ok(TransitionOutcome {
                id,
                from,
                to,
                noop: false,
                forced: !allowed,
            })
        })?;
        if outcome.forced {
            tracing::warn!(session_id = %id, from = %outcome.from, to = %outcome.to, "forced thread transition");
        }
        Ok(outcome)
    }
}

/// Record the main worktree as the `base` main session. An entry already
/// holding that path is promoted instead of duplicated.
fn insert_main(reg: &mut Registry, main_root: PathBuf, branch: String, now: DateTime<Utc>) {
    let existing = reg.find_by_path(&main_root).map(|s| s.id);
    if let Some(session) = existing.and_then(|id| reg.sessions.get_mut(&id)) {
        session.is_main = true;
        session.thread_type = Some(ThreadType::Base);
        return;
    }
    let id = reg.allocate_id();
    reg.sessions.insert(
        id,
        Session {
            id,
            path: main_root,
            branch,
            nickname: None,
            is_main: true,
            thread_type: Some(ThreadType::Base),
            created: now,
            last_active: now,
            merged_at: None,
        },
    );
    tracing::info!(session_id = %id, "registered main worktree");
}

/// Canonical form when the path exists, otherwise unchanged.
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rstest::rstest;

    fn memory_registry(root: &Path) -> SessionRegistry<MemoryStore<Registry>> {
        SessionRegistry::with_store(Layout::new(root), MemoryStore::default())
    }

    #[rstest]
    #[case("fusion", false, ThreadType::Fusion, false)]
    #[case("chained", false, ThreadType::Chained, false)]
    #[case("base", false, ThreadType::Base, false)]
    #[case("big", true, ThreadType::Big, true)]
    #[case("zero", true, ThreadType::Zero, true)]
    fn transitions_from_parallel(
        #[case] target: &str,
        #[case] force: bool,
        #[case] expected: ThreadType,
        #[case] forced: bool,
    ) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        let id = reg
            .register(&dir.path().join("wt"), None)
            .expect("register")
            .id;

        let out = reg
            .transition_thread(id, target, TransitionOptions { force })
            .expect("transition");
        assert_eq!(out.from, ThreadType::Parallel);
        assert_eq!(out.to, expected);
        assert_eq!(out.forced, forced);
        assert!(!out.noop);
        assert_eq!(
            reg.get(id).expect("get").expect("present").thread_type(),
            expected
        );
    }

    #[test]
    fn unknown_target_rejected_even_when_forced() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        let id = reg.register(&dir.path().join("wt"), None).expect("register").id;
        let err = reg
            .transition_thread(id, "sideways", TransitionOptions { force: true })
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownThreadType(_)));
    }

    #[test]
    fn register_in_main_root_marks_main() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        let main = reg.register(dir.path(), Some("trunk")).expect("register");
        assert!(main.session.is_main);
        assert_eq!(main.session.thread_type(), ThreadType::Base);
        assert_eq!(main.session.branch, UNKNOWN_BRANCH);

        let other = reg.register(&dir.path().join("wt"), None).expect("register");
        assert!(!other.session.is_main);
        assert_eq!(other.session.thread_type(), ThreadType::Parallel);
    }

    #[test]
    fn register_writes_lock_for_current_process() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        let id = reg.register(&dir.path().join("wt"), None).expect("register").id;
        let lock = lockfile::read(&reg.layout().locks_dir(), id).expect("lock present");
        assert_eq!(lock.pid, std::process::id());
    }

    #[test]
    fn register_session_is_idempotent_per_path() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        let new = NewSession {
            path: dir.path().join("wt"),
            branch: "feat/x".to_string(),
            nickname: None,
            thread_type: ThreadType::Parallel,
        };
        let a = reg.register_session(new.clone()).expect("first");
        let b = reg.register_session(new).expect("second");
        assert_eq!(a.id, b.id);
        // Main worktree took id 1.
        assert_eq!(a.id, SessionId(2));
        assert_eq!(reg.load().expect("load").next_id, 3);
    }

    #[test]
    fn register_session_records_missing_main_first() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        let worker = reg
            .register_session(NewSession {
                path: dir.path().join("wt"),
                branch: "feat/a".to_string(),
                nickname: None,
                thread_type: ThreadType::Parallel,
            })
            .expect("register");
        assert!(!worker.is_main);

        let loaded = reg.load().expect("load");
        let mains: Vec<&Session> = loaded.sessions.values().filter(|s| s.is_main).collect();
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].id, SessionId(1));
        assert_eq!(mains[0].path, normalize(dir.path()));
        assert_eq!(mains[0].thread_type(), ThreadType::Base);

        reg.register_session(NewSession {
            path: dir.path().join("wt2"),
            branch: "feat/b".to_string(),
            nickname: None,
            thread_type: ThreadType::Parallel,
        })
        .expect("register");
        let mains = reg
            .load()
            .expect("load")
            .sessions
            .values()
            .filter(|s| s.is_main)
            .count();
        assert_eq!(mains, 1);
    }

    #[test]
    fn touch_and_mark_merged_unknown_id() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let reg = memory_registry(dir.path());
        assert!(matches!(
            reg.touch(SessionId(9)).unwrap_err(),
            RegistryError::SessionNotFound(SessionId(9))
        ));
        let id = reg.register(&dir.path().join("wt"), None).expect("register").id;
        let at = Utc::now();
        let s = reg.mark_merged(id, at).expect("merged");
        assert_eq!(s.merged_at, Some(at));
    }
}
