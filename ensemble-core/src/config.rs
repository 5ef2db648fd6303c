//! Project configuration: `<main>/.ensemble/config.yaml`.
//!
//! Every field is optional; a missing file yields [`ProjectConfig::default`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{registry_io_err, RegistryError};
use crate::paths::Layout;
use crate::types::TeamMode;

pub const DEFAULT_INTEGRATION_BRANCH: &str = "main";
pub const DEFAULT_AGENT_COMMAND: &str = "claude";
pub const DEFAULT_INACTIVITY_DAYS: u32 = 7;
pub const DEFAULT_MULTIPLEXER_PREFIX: &str = "ensemble-";

pub const DEFAULT_STAGGER_MS: u64 = 2_000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_WAVE_TIMEOUT_MINUTES: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub project_name: Option<String>,
    pub integration_branch: String,
    /// Parent directory for new worktrees; default `<parent>/<project>-sessions`.
    pub worktree_root: Option<PathBuf>,
    pub agent_command: String,
    pub inactivity_days: u32,
    pub multiplexer_prefix: String,
    pub team: TeamConfig,
    pub wave: WaveConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_name: None,
            integration_branch: DEFAULT_INTEGRATION_BRANCH.to_string(),
            worktree_root: None,
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            inactivity_days: DEFAULT_INACTIVITY_DAYS,
            multiplexer_prefix: DEFAULT_MULTIPLEXER_PREFIX.to_string(),
            team: TeamConfig::default(),
            wave: WaveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TeamConfig {
    pub mode: TeamMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub stagger_ms: u64,
    /// 0 = unbounded.
    pub max_concurrent: usize,
    pub poll_interval_secs: u64,
    pub timeout_minutes: u64,
    /// argv template for one analyzer worker; `{prompt}` and `{sentinel}` are substituted.
    pub worker_command: Option<Vec<String>>,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            stagger_ms: DEFAULT_STAGGER_MS,
            max_concurrent: 0,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_minutes: DEFAULT_WAVE_TIMEOUT_MINUTES,
            worker_command: None,
        }
    }
}

impl ProjectConfig {
    /// Load `config.yaml` for `layout`, or defaults if absent.
    pub fn load(layout: &Layout) -> Result<Self, RegistryError> {
        Self::load_from(&layout.config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, RegistryError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(registry_io_err(path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| RegistryError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configured project name, falling back to the main worktree's directory name.
    pub fn project_name(&self, layout: &Layout) -> String {
        self.project_name
            .clone()
            .unwrap_or_else(|| layout.default_project_name())
    }

    /// Directory new worktrees are created under.
    pub fn worktree_root(&self, layout: &Layout) -> PathBuf {
        if let Some(root) = &self.worktree_root {
            return if root.is_absolute() {
                root.clone()
            } else {
                layout.main_root().join(root)
            };
        }
        let parent = layout
            .main_root()
            .parent()
            .unwrap_or_else(|| layout.main_root());
        parent.join(format!("{}-sessions", self.project_name(layout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = ProjectConfig::load(&Layout::new(dir.path())).expect("load");
        assert_eq!(cfg, ProjectConfig::default());
        assert_eq!(cfg.wave.stagger_ms, DEFAULT_STAGGER_MS);
        assert_eq!(cfg.team.mode, TeamMode::Subagent);
    }

    #[test]
    fn partial_file_merges_with_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::new(dir.path());
        std::fs::create_dir_all(layout.state_dir()).expect("mkdir");
        std::fs::write(
            layout.config_path(),
            "integration_branch: develop\nteam:\n  mode: native\nwave:\n  max_concurrent: 3\n",
        )
        .expect("write");

        let cfg = ProjectConfig::load(&layout).expect("load");
        assert_eq!(cfg.integration_branch, "develop");
        assert_eq!(cfg.team.mode, TeamMode::Native);
        assert_eq!(cfg.wave.max_concurrent, 3);
        assert_eq!(cfg.wave.stagger_ms, DEFAULT_STAGGER_MS);
        assert_eq!(cfg.inactivity_days, DEFAULT_INACTIVITY_DAYS);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::new(dir.path());
        std::fs::create_dir_all(layout.state_dir()).expect("mkdir");
        std::fs::write(layout.config_path(), "wave: [unclosed").expect("write");

        let err = ProjectConfig::load(&layout).unwrap_err();
        assert!(matches!(err, RegistryError::Config { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn worktree_root_defaults_beside_main() {
        let layout = Layout::new("/code/app");
        let cfg = ProjectConfig::default();
        assert_eq!(cfg.worktree_root(&layout), PathBuf::from("/code/app-sessions"));

        let cfg = ProjectConfig {
            worktree_root: Some(PathBuf::from("wt")),
            ..ProjectConfig::default()
        };
        assert_eq!(cfg.worktree_root(&layout), PathBuf::from("/code/app/wt"));
    }
}
