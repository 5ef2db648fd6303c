//! Mergeability checks and integration of a session branch into the target.
//!
//! Integration runs in the main worktree, which must have the target branch
//! checked out. A failed or conflicted merge is rolled back in the main
//! worktree; the session's worktree and branch are never touched in that case.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ensemble_core::{git, Session, SessionId};

use crate::error::SessionError;
use crate::worktree;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// One commit on the target containing the whole session diff.
    #[default]
    Squash,
    /// A `--no-ff` merge commit.
    Merge,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Squash => write!(f, "squash"),
            MergeStrategy::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "squash" => Ok(MergeStrategy::Squash),
            "merge" => Ok(MergeStrategy::Merge),
            other => Err(format!("unknown merge strategy '{other}'; expected: squash, merge")),
        }
    }
}

/// Why a session cannot be integrated right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeBlock {
    UncommittedChanges,
    NoChanges,
    MainSession,
    MissingWorktree,
    TargetNotCheckedOut,
    MergeFailed,
}

impl fmt::Display for MergeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeBlock::UncommittedChanges => "uncommitted_changes",
            MergeBlock::NoChanges => "no_changes",
            MergeBlock::MainSession => "main_session",
            MergeBlock::MissingWorktree => "missing_worktree",
            MergeBlock::TargetNotCheckedOut => "target_not_checked_out",
            MergeBlock::MergeFailed => "merge_failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mergeability {
    pub mergeable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<MergeBlock>,
    /// Changed paths when `reason = uncommitted_changes`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub commits_ahead: u32,
}

impl Mergeability {
    fn blocked(reason: MergeBlock) -> Self {
        Self {
            mergeable: false,
            reason: Some(reason),
            details: Vec::new(),
            commits_ahead: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrateOptions {
    pub strategy: MergeStrategy,
    pub delete_branch: bool,
    pub delete_worktree: bool,
}

impl Default for IntegrateOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Squash,
            delete_branch: true,
            delete_worktree: true,
        }
    }
}

/// Outcome of [`integrate`]. `success = false` is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub session_id: SessionId,
    pub branch: String,
    pub target_branch: String,
    pub strategy: MergeStrategy,
    pub success: bool,
    pub has_conflicts: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<MergeBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub commits_count: u32,
    pub branch_deleted: bool,
    pub worktree_removed: bool,
}

impl MergeReport {
    fn new(session: &Session, target: &str, strategy: MergeStrategy) -> Self {
        Self {
            session_id: session.id,
            branch: session.branch.clone(),
            target_branch: target.to_string(),
            strategy,
            success: false,
            has_conflicts: false,
            conflicts: Vec::new(),
            reason: None,
            message: None,
            commits_count: 0,
            branch_deleted: false,
            worktree_removed: false,
        }
    }

    /// An integration was attempted (as opposed to refused up front).
    pub fn attempted(&self) -> bool {
        self.success || self.has_conflicts || self.reason == Some(MergeBlock::MergeFailed)
    }
}

/// Can `session` be integrated into `target` as things stand?
pub fn check_mergeability(
    main_root: &Path,
    session: &Session,
    target: &str,
) -> Result<Mergeability, SessionError> {
    if session.is_main {
        return Ok(Mergeability::blocked(MergeBlock::MainSession));
    }
    if !session.path.exists() {
        return Ok(Mergeability::blocked(MergeBlock::MissingWorktree));
    }

    let changed = worktree::uncommitted_changes(&session.path)?;
    if !changed.is_empty() {
        return Ok(Mergeability {
            details: changed,
            ..Mergeability::blocked(MergeBlock::UncommittedChanges)
        });
    }

    let ahead = git::commits_ahead(main_root, target, &session.branch)?;
    if ahead == 0 {
        return Ok(Mergeability::blocked(MergeBlock::NoChanges));
    }
    Ok(Mergeability {
        mergeable: true,
        reason: None,
        details: Vec::new(),
        commits_ahead: ahead,
    })
}

/// Merge `session.branch` into `target` inside `main_root`.
///
/// On success the branch and worktree are removed per `opts`. On conflict or
/// any merge failure the main worktree is reset to its pre-merge state and
/// the session is left exactly as it was.
pub fn integrate(
    main_root: &Path,
    session: &Session,
    target: &str,
    opts: IntegrateOptions,
) -> Result<MergeReport, SessionError> {
    let mut report = MergeReport::new(session, target, opts.strategy);

    let check = check_mergeability(main_root, session, target)?;
    if !check.mergeable {
        report.reason = check.reason;
        if !check.details.is_empty() {
            report.message = Some(check.details.join(", "));
        }
        return Ok(report);
    }
    report.commits_count = check.commits_ahead;

    let checked_out = git::current_branch(main_root)?;
    if checked_out != target {
        report.reason = Some(MergeBlock::TargetNotCheckedOut);
        report.message = Some(format!(
            "main worktree is on '{checked_out}', expected '{target}'"
        ));
        return Ok(report);
    }

    let message = format!(
        "Merge session {} ({}) into {}",
        session.id, session.branch, target
    );
    let merged = match opts.strategy {
        MergeStrategy::Squash => {
            git::run_raw(main_root, &["merge", "--squash", &session.branch])
        }
        MergeStrategy::Merge => git::run_raw(
            main_root,
            &["merge", "--no-ff", "-m", &message, &session.branch],
        ),
    }?;

    if !merged.status.success() {
        let conflicts = git::conflicted_paths(main_root).unwrap_or_default();
        abort_merge(main_root, opts.strategy);
        if conflicts.is_empty() {
            report.reason = Some(MergeBlock::MergeFailed);
            report.message = Some(String::from_utf8_lossy(&merged.stderr).trim().to_string());
        } else {
            tracing::warn!(
                "session {} conflicts with {} in {} path(s); left untouched",
                session.id,
                target,
                conflicts.len()
            );
            report.has_conflicts = true;
            report.conflicts = conflicts;
        }
        return Ok(report);
    }

    if opts.strategy == MergeStrategy::Squash {
        let committed = git::run_raw(main_root, &["commit", "--no-edit", "-m", &message])?;
        if !committed.status.success() {
            abort_merge(main_root, opts.strategy);
            report.reason = Some(MergeBlock::MergeFailed);
            report.message = Some(String::from_utf8_lossy(&committed.stderr).trim().to_string());
            return Ok(report);
        }
    }
    report.success = true;
    tracing::info!(
        "merged session {} ({}) into {} via {}",
        session.id,
        session.branch,
        target,
        opts.strategy
    );

    // The merge is committed; cleanup failures are reported, not raised.
    if opts.delete_worktree {
        match git::remove_worktree(main_root, &session.path, true) {
            Ok(()) => report.worktree_removed = true,
            Err(err) => tracing::warn!("could not remove worktree {}: {}", session.path.display(), err),
        }
    }
    if opts.delete_branch {
        if opts.delete_worktree && !report.worktree_removed {
            tracing::warn!("keeping branch {} while its worktree remains", session.branch);
        } else {
            match git::delete_branch(main_root, &session.branch, true) {
                Ok(()) => report.branch_deleted = true,
                Err(err) => tracing::warn!("could not delete branch {}: {}", session.branch, err),
            }
        }
    }
    Ok(report)
}

fn abort_merge(main_root: &Path, strategy: MergeStrategy) {
    // A squash merge leaves no MERGE_HEAD, so only `reset --merge` undoes it.
    let args: &[&str] = match strategy {
        MergeStrategy::Merge => &["merge", "--abort"],
        MergeStrategy::Squash => &["reset", "--merge"],
    };
    if let Err(err) = git::run(main_root, args) {
        tracing::warn!("rollback `git {}` failed: {}", args.join(" "), err);
    }
}
