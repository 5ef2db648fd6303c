//! Domain types for the session registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types round-trip through serde_json; the registry document is the
//! on-disk format other tooling reads.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Current registry schema version written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric session identifier. Allocated from `Registry::next_id`, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for SessionId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A session's role in the repository's line of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadType {
    /// The main line; reserved for the main worktree.
    Base,
    /// Independent branch of work.
    Parallel,
    /// Depends on another session's output.
    Chained,
    /// Merge in progress.
    Fusion,
    Big,
    Long,
    Zero,
}

impl ThreadType {
    /// Every variant in a stable order.
    pub fn all() -> &'static [ThreadType] {
        &[
            ThreadType::Base,
            ThreadType::Parallel,
            ThreadType::Chained,
            ThreadType::Fusion,
            ThreadType::Big,
            ThreadType::Long,
            ThreadType::Zero,
        ]
    }

    /// Legal targets from this type. Anything else needs `force`.
    pub fn allowed_transitions(&self) -> &'static [ThreadType] {
        match self {
            ThreadType::Base => &[],
            ThreadType::Parallel => &[ThreadType::Fusion, ThreadType::Chained, ThreadType::Base],
            ThreadType::Chained => &[ThreadType::Parallel, ThreadType::Fusion],
            ThreadType::Fusion => &[ThreadType::Parallel, ThreadType::Base],
            ThreadType::Big => &[ThreadType::Parallel, ThreadType::Long],
            ThreadType::Long => &[ThreadType::Parallel, ThreadType::Big],
            ThreadType::Zero => &[ThreadType::Parallel],
        }
    }

    pub fn can_transition_to(&self, target: ThreadType) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadType::Base => "base",
            ThreadType::Parallel => "parallel",
            ThreadType::Chained => "chained",
            ThreadType::Fusion => "fusion",
            ThreadType::Big => "big",
            ThreadType::Long => "long",
            ThreadType::Zero => "zero",
        }
    }
}

impl fmt::Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ThreadType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| RegistryError::UnknownThreadType(s.to_string()))
    }
}

/// Team execution mode: native multi-agent teams or a single orchestrator
/// dispatching sub-agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TeamMode {
    Native,
    #[default]
    Subagent,
}

impl fmt::Display for TeamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamMode::Native => write!(f, "native"),
            TeamMode::Subagent => write!(f, "subagent"),
        }
    }
}

impl FromStr for TeamMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(TeamMode::Native),
            "subagent" => Ok(TeamMode::Subagent),
            other => Err(format!(
                "unknown team mode '{other}'; expected: native, subagent"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One git worktree plus its registry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Absolute path to the worktree root.
    pub path: PathBuf,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub is_main: bool,
    /// Absent in legacy registries; see [`Session::thread_type`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_type: Option<ThreadType>,
    pub created: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Effective thread type; legacy entries infer `base` for main, else `parallel`.
    pub fn thread_type(&self) -> ThreadType {
        match self.thread_type {
            Some(t) => t,
            None if self.is_main => ThreadType::Base,
            None => ThreadType::Parallel,
        }
    }

    /// Nickname if set, otherwise the branch name.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.branch)
    }
}

/// Root of the per-repository session registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub schema_version: u32,
    /// Next ID to allocate. Monotonic; deleted IDs are never reissued.
    pub next_id: u64,
    #[serde(default)]
    pub project_name: String,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub sessions: BTreeMap<SessionId, Session>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            next_id: 1,
            project_name: String::new(),
            updated: Utc::now(),
            sessions: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn main_session(&self) -> Option<&Session> {
        self.sessions.values().find(|s| s.is_main)
    }

    pub fn find_by_path(&self, path: &std::path::Path) -> Option<&Session> {
        self.sessions.values().find(|s| s.path == path)
    }

    /// Hand out the next ID and advance the counter.
    pub fn allocate_id(&mut self) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
