//! Cleanup wizard: find stale sessions/worktrees and apply confirmed fixes.
//!
//! Scanning never mutates anything. Applying acts only on findings that the
//! injected [`Confirm`] accepts; use [`AutoConfirm`] for the unattended path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use ensemble_core::{git, lockfile, DocumentStore, Registry, SessionId, SessionRegistry};

use crate::error::SessionError;
use crate::multiplexer::Multiplexer;
use crate::worktree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Worktree known to git but absent from the registry.
    OrphanedWorktree,
    /// Registry entry whose worktree path is gone.
    MissingPath,
    /// Clean session untouched for longer than the threshold.
    Inactive,
    /// Multiplexer session with no live panes.
    DeadMultiplexer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CleanupAction {
    RemoveWorktree { path: PathBuf },
    DeleteSession { id: SessionId, remove_worktree: bool },
    KillMultiplexerSession { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub subject: String,
    pub detail: String,
    pub action: CleanupAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAction {
    pub finding: Finding,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub findings: usize,
    pub applied: Vec<AppliedAction>,
    pub skipped: Vec<Finding>,
}

/// Per-finding confirmation.
pub trait Confirm {
    fn confirm(&mut self, finding: &Finding) -> bool;
}

/// Accept everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&mut self, _finding: &Finding) -> bool {
        true
    }
}

/// Reject everything (report-only).
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl Confirm for DenyAll {
    fn confirm(&mut self, _finding: &Finding) -> bool {
        false
    }
}

impl<F: FnMut(&Finding) -> bool> Confirm for F {
    fn confirm(&mut self, finding: &Finding) -> bool {
        self(finding)
    }
}

/// Detect all four problem classes.
pub fn scan<S: DocumentStore<Registry>>(
    registry: &SessionRegistry<S>,
    mux: &dyn Multiplexer,
    inactivity_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<Finding>, SessionError> {
    let layout = registry.layout();
    let main_root = normalize(layout.main_root());
    let reg = registry.store().load_fresh()?;
    let mut findings = Vec::new();

    // 1. Orphaned worktrees.
    for entry in git::list_worktrees(layout.main_root())? {
        let path = normalize(&entry.path);
        if entry.bare || path == main_root {
            continue;
        }
        let known = reg.sessions.values().any(|s| normalize(&s.path) == path);
        if !known {
            findings.push(Finding {
                kind: FindingKind::OrphanedWorktree,
                subject: path.display().to_string(),
                detail: format!(
                    "worktree on branch {} is not registered",
                    entry.branch.as_deref().unwrap_or("(detached)")
                ),
                action: CleanupAction::RemoveWorktree { path },
            });
        }
    }

    let threshold = Duration::days(i64::from(inactivity_days));
    for session in reg.sessions.values().filter(|s| !s.is_main) {
        // 2. Missing paths.
        if !session.path.exists() {
            findings.push(Finding {
                kind: FindingKind::MissingPath,
                subject: format!("session {} ({})", session.id, session.display_name()),
                detail: format!("path {} no longer exists", session.path.display()),
                action: CleanupAction::DeleteSession {
                    id: session.id,
                    remove_worktree: false,
                },
            });
            continue;
        }

        // 3. Inactive and clean.
        let idle = now.signed_duration_since(session.last_active);
        if idle <= threshold || lockfile::is_live(&layout.locks_dir(), session.id) {
            continue;
        }
        match worktree::uncommitted_changes(&session.path) {
            Ok(changed) if changed.is_empty() => findings.push(Finding {
                kind: FindingKind::Inactive,
                subject: format!("session {} ({})", session.id, session.display_name()),
                detail: format!("inactive for {} days with a clean tree", idle.num_days()),
                action: CleanupAction::DeleteSession {
                    id: session.id,
                    remove_worktree: true,
                },
            }),
            Ok(_) => {}
            Err(err) => tracing::warn!("status of {} failed: {}", session.path.display(), err),
        }
    }

    // 4. Dead multiplexer sessions.
    match mux.sessions() {
        Ok(sessions) => {
            for s in sessions.into_iter().filter(|s| s.is_dead()) {
                findings.push(Finding {
                    kind: FindingKind::DeadMultiplexer,
                    subject: s.name.clone(),
                    detail: format!("{} pane(s), none alive", s.panes),
                    action: CleanupAction::KillMultiplexerSession { name: s.name },
                });
            }
        }
        Err(err) => tracing::warn!("multiplexer probe failed: {}", err),
    }

    Ok(findings)
}

/// Apply each confirmed finding. One failure never stops the rest.
pub fn apply<S: DocumentStore<Registry>>(
    registry: &SessionRegistry<S>,
    mux: &dyn Multiplexer,
    findings: Vec<Finding>,
    confirm: &mut dyn Confirm,
) -> CleanupReport {
    let mut report = CleanupReport {
        findings: findings.len(),
        ..CleanupReport::default()
    };
    for finding in findings {
        if !confirm.confirm(&finding) {
            report.skipped.push(finding);
            continue;
        }
        let result = apply_one(registry, mux, &finding.action);
        if let Err(err) = &result {
            tracing::warn!("cleanup of {} failed: {}", finding.subject, err);
        }
        report.applied.push(AppliedAction {
            finding,
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }
    report
}

fn apply_one<S: DocumentStore<Registry>>(
    registry: &SessionRegistry<S>,
    mux: &dyn Multiplexer,
    action: &CleanupAction,
) -> Result<(), SessionError> {
    let main_root = registry.layout().main_root();
    match action {
        CleanupAction::RemoveWorktree { path } => {
            if path.exists() {
                git::remove_worktree(main_root, path, true)?;
            }
            git::prune_worktrees(main_root)?;
        }
        CleanupAction::DeleteSession {
            id,
            remove_worktree,
        } => {
            registry.delete(*id, *remove_worktree)?;
            if !*remove_worktree {
                // Drop git's record of the vanished directory too.
                git::prune_worktrees(main_root)?;
            }
        }
        CleanupAction::KillMultiplexerSession { name } => mux.kill(name)?,
    }
    Ok(())
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(subject: &str) -> Finding {
        Finding {
            kind: FindingKind::DeadMultiplexer,
            subject: subject.to_string(),
            detail: String::new(),
            action: CleanupAction::KillMultiplexerSession {
                name: subject.to_string(),
            },
        }
    }

    #[test]
    fn closure_confirm_selects_findings() {
        let mut only_a = |f: &Finding| f.subject == "a";
        assert!(only_a.confirm(&finding("a")));
        assert!(!only_a.confirm(&finding("b")));
        assert!(AutoConfirm.confirm(&finding("b")));
        assert!(!DenyAll.confirm(&finding("a")));
    }

    #[test]
    fn action_serializes_with_tag() {
        let json = serde_json::to_value(CleanupAction::DeleteSession {
            id: SessionId(4),
            remove_worktree: true,
        })
        .expect("json");
        assert_eq!(json["action"], "delete_session");
        assert_eq!(json["id"], 4);
    }
}
