//! Worktree creation and the per-worktree view of shared project state.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use ensemble_core::paths::{self, Layout};
use ensemble_core::{git, ProjectConfig};

use crate::error::{io_err, SessionError};

/// How a worktree reaches `<main>/.ensemble/shared`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharedLink {
    /// Relative symlink; `target` is the link contents.
    Symlink { target: PathBuf },
    /// Symlink failed; the directory was copied.
    Copied { files: usize },
}

/// A freshly added git worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewWorktree {
    pub path: PathBuf,
    pub branch: String,
    /// `true` when the branch did not exist and was created from the base.
    pub created_branch: bool,
}

/// `<worktree_root>/<branch-slug>`
pub fn worktree_path(layout: &Layout, config: &ProjectConfig, branch: &str) -> PathBuf {
    config
        .worktree_root(layout)
        .join(paths::branch_slug(branch))
}

/// Add a worktree for `branch`, creating the branch from the integration
/// branch (or `HEAD`) when it does not exist yet.
pub fn add(layout: &Layout, config: &ProjectConfig, branch: &str) -> Result<NewWorktree, SessionError> {
    let path = worktree_path(layout, config, branch);
    if path.exists() {
        return Err(SessionError::WorktreeExists(path));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let main_root = layout.main_root();
    let created_branch = !git::branch_exists(main_root, branch);
    let base = if git::branch_exists(main_root, &config.integration_branch) {
        config.integration_branch.as_str()
    } else {
        "HEAD"
    };
    git::add_worktree(main_root, &path, branch, created_branch, base)?;
    tracing::info!(
        "added worktree {} for branch {}{}",
        path.display(),
        branch,
        if created_branch { " (new)" } else { "" }
    );
    Ok(NewWorktree {
        path,
        branch: branch.to_string(),
        created_branch,
    })
}

/// Point `<worktree>/.ensemble/shared` at the main shared directory.
///
/// A relative symlink keeps STATUS/CONVENTIONS a single source of truth. If
/// the link cannot be made (occupied destination, no symlink support) the
/// directory is copied instead.
pub fn link_shared(layout: &Layout, worktree: &Path) -> Result<SharedLink, SessionError> {
    let shared = layout.shared_dir();
    std::fs::create_dir_all(&shared).map_err(|e| io_err(&shared, e))?;
    let link = paths::shared_link_path(worktree);
    let link_dir = link
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| worktree.to_path_buf());
    std::fs::create_dir_all(&link_dir).map_err(|e| io_err(&link_dir, e))?;

    let from = std::fs::canonicalize(&link_dir).map_err(|e| io_err(&link_dir, e))?;
    let to = std::fs::canonicalize(&shared).map_err(|e| io_err(&shared, e))?;
    let target = relative_path(&from, &to);

    match symlink_dir(&target, &link) {
        Ok(()) => {
            tracing::debug!("linked {} -> {}", link.display(), target.display());
            Ok(SharedLink::Symlink { target })
        }
        Err(err) => {
            tracing::warn!(
                "symlink {} failed ({}); copying shared state instead",
                link.display(),
                err
            );
            let files = copy_dir(&shared, &link)?;
            Ok(SharedLink::Copied { files })
        }
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Path from directory `from` to `to`; both absolute and normalized.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to[common..] {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// Recursive copy; existing files at the destination are overwritten.
/// Returns the number of files copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<usize, SessionError> {
    if dst.is_file() || dst.is_symlink() {
        std::fs::remove_file(dst).map_err(|e| io_err(dst, e))?;
    }
    std::fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    let mut copied = 0;
    for entry in std::fs::read_dir(src).map_err(|e| io_err(src, e))? {
        let entry = entry.map_err(|e| io_err(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| io_err(&from, e))?;
        if file_type.is_dir() {
            copied += copy_dir(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| io_err(&to, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Uncommitted paths in `dir`, ignoring the per-worktree state directory.
pub fn uncommitted_changes(dir: &Path) -> Result<Vec<String>, SessionError> {
    let state_prefix = format!("{}/", paths::STATE_DIR);
    Ok(git::changed_paths(dir)?
        .into_iter()
        .filter(|p| p != paths::STATE_DIR && !p.starts_with(&state_prefix))
        .collect())
}
