//! Terminal multiplexer probe (tmux).

use std::collections::BTreeMap;
use std::process::Command;

use serde::Serialize;

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MuxSession {
    pub name: String,
    pub panes: usize,
    pub live_panes: usize,
}

impl MuxSession {
    pub fn is_dead(&self) -> bool {
        self.live_panes == 0
    }
}

pub trait Multiplexer: Send + Sync {
    /// Sessions whose name starts with the configured prefix.
    fn sessions(&self) -> Result<Vec<MuxSession>, SessionError>;

    fn kill(&self, name: &str) -> Result<(), SessionError>;
}

pub struct TmuxMultiplexer {
    prefix: String,
}

impl TmuxMultiplexer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Multiplexer for TmuxMultiplexer {
    fn sessions(&self) -> Result<Vec<MuxSession>, SessionError> {
        let output = match Command::new("tmux")
            .args(["list-panes", "-a", "-F", "#{session_name} #{pane_dead}"])
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                // tmux not installed: nothing to report.
                tracing::debug!("tmux unavailable: {}", err);
                return Ok(Vec::new());
            }
        };
        if !output.status.success() {
            // "no server running" and friends.
            tracing::debug!(
                "tmux list-panes: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_pane_list(&stdout)
            .into_iter()
            .filter(|s| s.name.starts_with(&self.prefix))
            .collect())
    }

    fn kill(&self, name: &str) -> Result<(), SessionError> {
        let output = Command::new("tmux")
            .args(["kill-session", "-t", name])
            .output()
            .map_err(|e| SessionError::Multiplexer(e.to_string()))?;
        if !output.status.success() {
            return Err(SessionError::Multiplexer(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Multiplexer that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMultiplexer;

impl Multiplexer for NoMultiplexer {
    fn sessions(&self) -> Result<Vec<MuxSession>, SessionError> {
        Ok(Vec::new())
    }

    fn kill(&self, name: &str) -> Result<(), SessionError> {
        Err(SessionError::Multiplexer(format!("no multiplexer to kill '{name}'")))
    }
}

/// Aggregate `<session_name> <pane_dead>` lines per session.
pub fn parse_pane_list(out: &str) -> Vec<MuxSession> {
    let mut by_name: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for line in out.lines() {
        let Some((name, dead)) = line.trim_end().rsplit_once(' ') else {
            continue;
        };
        let entry = by_name.entry(name.to_string()).or_default();
        entry.0 += 1;
        if dead.trim() != "1" {
            entry.1 += 1;
        }
    }
    by_name
        .into_iter()
        .map(|(name, (panes, live_panes))| MuxSession {
            name,
            panes,
            live_panes,
        })
        .collect()
}
