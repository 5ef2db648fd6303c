//! On-disk layout, rooted at the main worktree.
//!
//! ```text
//! <main>/.ensemble/
//!   registry.json
//!   config.yaml
//!   locks/session-<id>.lock
//!   merge-history.json
//!   events.jsonl
//!   shared/
//!   teams/<name>.yaml
//!   waves/<trace_id>/
//! <worktree>/.ensemble/
//!   state.json
//!   shared -> <main>/.ensemble/shared
//! ```

use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".ensemble";
pub const REGISTRY_FILE: &str = "registry.json";
pub const CONFIG_FILE: &str = "config.yaml";
pub const LOCKS_DIR: &str = "locks";
pub const HISTORY_FILE: &str = "merge-history.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const SHARED_DIR: &str = "shared";
pub const TEAMS_DIR: &str = "teams";
pub const WAVES_DIR: &str = "waves";
pub const SESSION_STATE_FILE: &str = "state.json";

/// Shared conventions file inside the shared directory.
pub const CONVENTIONS_FILE: &str = "CONVENTIONS.md";
/// Shared status file inside the shared directory.
pub const STATUS_FILE: &str = "STATUS.md";

/// Repository-wide paths derived from the main worktree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    main_root: PathBuf,
}

impl Layout {
    pub fn new(main_root: impl Into<PathBuf>) -> Self {
        Self {
            main_root: main_root.into(),
        }
    }

    pub fn main_root(&self) -> &Path {
        &self.main_root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.main_root.join(STATE_DIR)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir().join(REGISTRY_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join(LOCKS_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir().join(HISTORY_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir().join(EVENTS_FILE)
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.state_dir().join(SHARED_DIR)
    }

    pub fn teams_dir(&self) -> PathBuf {
        self.state_dir().join(TEAMS_DIR)
    }

    pub fn waves_dir(&self) -> PathBuf {
        self.state_dir().join(WAVES_DIR)
    }

    /// Directory name of the main worktree; default project name.
    pub fn default_project_name(&self) -> String {
        self.main_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    }
}

/// `<worktree>/.ensemble/state.json`
pub fn session_state_path(worktree: &Path) -> PathBuf {
    worktree.join(STATE_DIR).join(SESSION_STATE_FILE)
}

/// `<worktree>/.ensemble/shared`
pub fn shared_link_path(worktree: &Path) -> PathBuf {
    worktree.join(STATE_DIR).join(SHARED_DIR)
}

/// Reduce a branch name to a single safe path component.
pub fn branch_slug(branch: &str) -> String {
    let slug: String = branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    let trimmed = slug.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_under_state_dir() {
        let layout = Layout::new("/code/app");
        assert_eq!(layout.registry_path(), PathBuf::from("/code/app/.ensemble/registry.json"));
        assert!(layout.locks_dir().ends_with(".ensemble/locks"));
        assert!(layout.events_path().ends_with(".ensemble/events.jsonl"));
        assert_eq!(layout.default_project_name(), "app");
    }

    #[test]
    fn worktree_paths() {
        let wt = Path::new("/code/app-sessions/feat-x");
        assert!(session_state_path(wt).ends_with(".ensemble/state.json"));
        assert!(shared_link_path(wt).ends_with(".ensemble/shared"));
    }

    #[test]
    fn slug_flattens_branch_separators() {
        assert_eq!(branch_slug("feature/auth-flow"), "feature-auth-flow");
        assert_eq!(branch_slug("../x"), "x");
        assert_eq!(branch_slug("///"), "session");
    }
}
