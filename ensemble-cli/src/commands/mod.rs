pub mod lifecycle;
pub mod session;
pub mod team;
pub mod wave;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use ensemble_core::{git, Layout, ProjectConfig, SessionRegistry};
use ensemble_session::LifecycleManager;

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct Globals {
    pub json: bool,
    pub cwd: PathBuf,
    root: Option<PathBuf>,
}

impl Globals {
    pub fn new(json: bool, root: Option<PathBuf>) -> Result<Self> {
        let cwd = std::env::current_dir().context("could not determine current directory")?;
        Ok(Self { json, cwd, root })
    }

    /// `--root`, else the main worktree of the repository around the cwd.
    pub fn main_root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => git::main_worktree_root(&self.cwd).with_context(|| {
                format!(
                    "'{}' is not inside a git repository; pass --root <DIR>",
                    self.cwd.display()
                )
            }),
        }
    }

    pub fn layout(&self) -> Result<Layout> {
        Ok(Layout::new(self.main_root()?))
    }

    pub fn config(&self) -> Result<ProjectConfig> {
        let layout = self.layout()?;
        ProjectConfig::load(&layout).context("failed to load .ensemble/config.yaml")
    }

    pub fn registry(&self) -> Result<SessionRegistry> {
        SessionRegistry::open(self.main_root()?).context("failed to open session registry")
    }

    pub fn lifecycle(&self) -> Result<LifecycleManager> {
        LifecycleManager::open(self.main_root()?).context("failed to open session registry")
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}

/// JSON when `--json`, otherwise `human`.
pub fn emit<T: Serialize>(globals: &Globals, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if globals.json {
        print_json(value)
    } else {
        human(value);
        Ok(())
    }
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    kind: &'a str,
    error: String,
}

/// A refused operation: reported as a result, exit status 0.
pub fn refused(globals: &Globals, kind: &str, error: impl ToString) -> Result<()> {
    let failure = Failure {
        success: false,
        kind,
        error: error.to_string(),
    };
    emit(globals, &failure, |f| {
        println!("{} {}", "✗".red().bold(), f.error);
    })
}

pub fn ok_mark() -> colored::ColoredString {
    "✓".green().bold()
}

pub fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// "3m", "5h", "2d", relative to now.
pub fn age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}
