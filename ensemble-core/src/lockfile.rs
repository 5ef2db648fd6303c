//! Per-session liveness markers.
//!
//! ```text
//! <main>/.ensemble/locks/session-<id>.lock
//!   pid=<integer>
//!   started=<unix-epoch-seconds>
//! ```
//!
//! These files do not exclude anyone; registry mutation is serialized by the
//! document store. A lock file is reclaimed only when no process with its pid
//! exists. A live but slow process keeps its lock.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{registry_io_err, RegistryError};
use crate::types::SessionId;

/// Parsed contents of a session lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLock {
    pub pid: u32,
    pub started: i64,
}

impl SessionLock {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            started: Utc::now().timestamp(),
        }
    }

    pub fn render(&self) -> String {
        format!("pid={}\nstarted={}\n", self.pid, self.started)
    }

    /// Parse `pid=` / `started=` lines; unknown lines are ignored.
    pub fn parse(contents: &str) -> Option<Self> {
        let mut pid = None;
        let mut started = None;
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "pid" => pid = value.trim().parse::<u32>().ok(),
                "started" => started = value.trim().parse::<i64>().ok(),
                _ => {}
            }
        }
        Some(Self {
            pid: pid?,
            started: started.unwrap_or(0),
        })
    }

    pub fn is_alive(&self) -> bool {
        process_alive(self.pid)
    }
}

/// `<locks_dir>/session-<id>.lock`. Pure, no I/O.
pub fn lock_path(locks_dir: &Path, id: SessionId) -> PathBuf {
    locks_dir.join(format!("session-{id}.lock"))
}

/// Write (or refresh) the lock for `id`, owned by the current process.
pub fn write(locks_dir: &Path, id: SessionId) -> Result<SessionLock, RegistryError> {
    std::fs::create_dir_all(locks_dir).map_err(|e| registry_io_err(locks_dir, e))?;
    let lock = SessionLock::current();
    let path = lock_path(locks_dir, id);
    let tmp = path.with_extension("lock.tmp");
    std::fs::write(&tmp, lock.render()).map_err(|e| registry_io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| registry_io_err(&path, e))?;
    Ok(lock)
}

/// Read the lock for `id`; `None` if absent or unparseable.
pub fn read(locks_dir: &Path, id: SessionId) -> Option<SessionLock> {
    let contents = std::fs::read_to_string(lock_path(locks_dir, id)).ok()?;
    SessionLock::parse(&contents)
}

/// Remove the lock for `id`. Missing files are not an error.
pub fn remove(locks_dir: &Path, id: SessionId) -> Result<(), RegistryError> {
    let path = lock_path(locks_dir, id);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(registry_io_err(&path, err)),
    }
}

/// `true` if a lock exists for `id` and its owner is still running.
pub fn is_live(locks_dir: &Path, id: SessionId) -> bool {
    read(locks_dir, id).map(|l| l.is_alive()).unwrap_or(false)
}

/// Delete every lock file whose owning pid no longer exists.
///
/// Files without a readable pid count as dead. Returns the number removed.
pub fn reap_dead(locks_dir: &Path) -> Result<usize, RegistryError> {
    let entries = match std::fs::read_dir(locks_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(registry_io_err(locks_dir, err)),
    };

    let mut cleaned = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        let alive = std::fs::read_to_string(&path)
            .ok()
            .and_then(|c| SessionLock::parse(&c))
            .map(|l| l.is_alive())
            .unwrap_or(false);
        if alive {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(lock = %path.display(), "removed stale session lock");
                cleaned += 1;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(lock = %path.display(), error = %err, "failed to remove stale session lock");
            }
        }
    }
    Ok(cleaned)
}

/// Process existence check (signal 0).
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: kill with signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Spawn and reap a short-lived child to obtain a pid that no longer exists.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        pid
    }

    #[test]
    fn parse_two_line_format() {
        let lock = SessionLock::parse("pid=4242\nstarted=1700000000\n").expect("parse");
        assert_eq!(lock.pid, 4242);
        assert_eq!(lock.started, 1_700_000_000);
        assert_eq!(SessionLock::parse(&lock.render()), Some(lock));
    }

    #[test]
    fn parse_without_pid_is_none() {
        assert_eq!(SessionLock::parse("started=1\n"), None);
        assert_eq!(SessionLock::parse("garbage"), None);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }

    #[test]
    fn write_read_remove() {
        let dir = TempDir::new().expect("tempdir");
        let id = SessionId(7);
        write(dir.path(), id).expect("write");
        assert!(is_live(dir.path(), id));
        assert_eq!(read(dir.path(), id).map(|l| l.pid), Some(std::process::id()));
        remove(dir.path(), id).expect("remove");
        remove(dir.path(), id).expect("second remove is fine");
        assert!(read(dir.path(), id).is_none());
    }

    #[test]
    fn reap_removes_only_dead_owners() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), SessionId(1)).expect("live lock");
        let stale = SessionLock {
            pid: dead_pid(),
            started: 0,
        };
        std::fs::write(lock_path(dir.path(), SessionId(2)), stale.render()).expect("stale");
        std::fs::write(lock_path(dir.path(), SessionId(3)), "corrupt").expect("corrupt");

        let cleaned = reap_dead(dir.path()).expect("reap");
        assert_eq!(cleaned, 2);
        assert!(lock_path(dir.path(), SessionId(1)).exists());
        assert!(!lock_path(dir.path(), SessionId(2)).exists());
    }

    #[test]
    fn reap_missing_dir_is_zero() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(reap_dead(&dir.path().join("nope")).expect("reap"), 0);
    }
}
