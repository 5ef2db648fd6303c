//! Thin `git` subprocess runner.
//!
//! Every helper takes the directory to run in; nothing relies on the process
//! working directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::GitError;

/// A `git worktree list --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name; `None` when detached.
    pub branch: Option<String>,
    pub bare: bool,
}

/// Run git and return the raw output, whatever the exit status.
pub fn run_raw(dir: &Path, args: &[&str]) -> Result<Output, GitError> {
    Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .map_err(|source| GitError::Spawn {
            dir: dir.to_path_buf(),
            source,
        })
}

/// Run git and return trimmed stdout, failing on non-zero exit.
pub fn run(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = run_raw(dir, args)?;
    if !output.status.success() {
        return Err(GitError::Failed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Root of the main worktree for any worktree of the repository at `dir`.
pub fn main_worktree_root(dir: &Path) -> Result<PathBuf, GitError> {
    let common = run(
        dir,
        &["rev-parse", "--path-format=absolute", "--git-common-dir"],
    )?;
    let common = PathBuf::from(common);
    match common.parent() {
        Some(parent) if common.file_name().map(|n| n == ".git").unwrap_or(false) => {
            Ok(parent.to_path_buf())
        }
        // Bare or unusual layouts: fall back to the toplevel of `dir`.
        _ => run(dir, &["rev-parse", "--show-toplevel"]).map(PathBuf::from),
    }
}

pub fn current_branch(dir: &Path) -> Result<String, GitError> {
    run(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

pub fn branch_exists(dir: &Path, branch: &str) -> bool {
    let reference = format!("refs/heads/{branch}");
    run(dir, &["show-ref", "--verify", "--quiet", &reference]).is_ok()
}

/// Create a worktree at `path`. Creates `branch` from `base` when `create_branch`.
pub fn add_worktree(
    main_root: &Path,
    path: &Path,
    branch: &str,
    create_branch: bool,
    base: &str,
) -> Result<(), GitError> {
    let path_str = path.to_string_lossy();
    if create_branch {
        run(main_root, &["worktree", "add", "-b", branch, &path_str, base])?;
    } else {
        run(main_root, &["worktree", "add", &path_str, branch])?;
    }
    Ok(())
}

pub fn remove_worktree(main_root: &Path, path: &Path, force: bool) -> Result<(), GitError> {
    let path_str = path.to_string_lossy();
    let mut args = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&path_str);
    run(main_root, &args)?;
    Ok(())
}

pub fn prune_worktrees(main_root: &Path) -> Result<(), GitError> {
    run(main_root, &["worktree", "prune"]).map(|_| ())
}

pub fn delete_branch(main_root: &Path, branch: &str, force: bool) -> Result<(), GitError> {
    let flag = if force { "-D" } else { "-d" };
    run(main_root, &["branch", flag, branch]).map(|_| ())
}

pub fn list_worktrees(main_root: &Path) -> Result<Vec<WorktreeEntry>, GitError> {
    let out = run(main_root, &["worktree", "list", "--porcelain"])?;
    Ok(parse_worktree_list(&out))
}

/// Parse `git worktree list --porcelain` output.
pub fn parse_worktree_list(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                entries.push(done);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                bare: false,
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
        } else if line == "bare" {
            entry.bare = true;
        }
    }
    if let Some(done) = current {
        entries.push(done);
    }
    entries
}

/// Paths with uncommitted changes (tracked or untracked), from `status --porcelain`.
pub fn changed_paths(dir: &Path) -> Result<Vec<String>, GitError> {
    // Not `run`: trimming would eat the leading status column.
    let output = run_raw(dir, &["status", "--porcelain"])?;
    if !output.status.success() {
        return Err(GitError::Failed {
            args: "status --porcelain".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let out = String::from_utf8_lossy(&output.stdout);
    Ok(out
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| l[3..].to_string())
        .collect())
}

/// Number of commits on `branch` not reachable from `base`.
pub fn commits_ahead(dir: &Path, base: &str, branch: &str) -> Result<u32, GitError> {
    let range = format!("{base}..{branch}");
    let out = run(dir, &["rev-list", "--count", &range])?;
    out.parse::<u32>().map_err(|_| GitError::Failed {
        args: format!("rev-list --count {range}"),
        stderr: format!("unexpected output '{out}'"),
    })
}

/// Unmerged paths during a conflicted merge.
pub fn conflicted_paths(dir: &Path) -> Result<Vec<String>, GitError> {
    let out = run(dir, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_porcelain_worktree_list() {
        let out = "worktree /code/app\nHEAD abc123\nbranch refs/heads/main\n\n\
                   worktree /code/app-sessions/feat-x\nHEAD def456\nbranch refs/heads/feat/x\n\n\
                   worktree /code/app-sessions/detached\nHEAD 0123\ndetached\n";
        let entries = parse_worktree_list(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, PathBuf::from("/code/app"));
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("feat/x"));
        assert_eq!(entries[2].branch, None);
        assert_eq!(entries[2].head.as_deref(), Some("0123"));
    }
}
