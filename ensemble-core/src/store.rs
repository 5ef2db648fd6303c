//! Lock-guarded JSON document store.
//!
//! # Write discipline
//!
//! ```text
//! <doc>.json        committed document (only ever replaced by rename)
//! <doc>.json.tmp    in-flight write, same directory as the target
//! <doc>.json.lock   advisory exclusive lock held for save / read-modify-write
//! ```
//!
//! Every mutation of shared state goes through [`DocumentStore::read_modify_write`]:
//! lock → fresh read (cache bypassed) → update → write `.tmp` → `rename` →
//! invalidate cache → unlock. A reader never observes a half-written document.
//!
//! The lock is an `flock`-style advisory lock. The kernel drops it when the
//! holder exits, so a crashed holder never wedges other processes; acquisition
//! is retried with backoff and gives up with [`StoreError::Busy`].

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};

/// How long a loaded document is served from memory.
pub const CACHE_TTL: Duration = Duration::from_secs(10);

/// Default ceiling for lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_CEILING: Duration = Duration::from_millis(200);

/// Environment override for the lock acquisition ceiling, in milliseconds.
pub const LOCK_TIMEOUT_ENV: &str = "ENSEMBLE_LOCK_TIMEOUT_MS";

/// Single-writer, read-modify-write access to one document.
///
/// Implementations must make `read_modify_write` atomic with respect to
/// other callers of the same document, and must skip the write when the
/// update leaves the document unchanged.
pub trait DocumentStore<T>: Send + Sync {
    /// Load the document, possibly from a cache no older than [`CACHE_TTL`].
    fn load(&self) -> Result<T, StoreError>;

    /// Load the committed document, bypassing any cache.
    fn load_fresh(&self) -> Result<T, StoreError>;

    /// Replace the document wholesale.
    fn save(&self, doc: &T) -> Result<(), StoreError>;

    /// Apply `update` to the freshest committed document and write it back.
    ///
    /// If `update` returns `Err`, nothing is written.
    fn read_modify_write<R, E, F>(&self, update: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<StoreError>;

    /// Drop any cached copy so the next `load` reads committed state.
    fn invalidate_cache(&self);
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

struct Cached<T> {
    loaded_at: Instant,
    doc: T,
}

/// Filesystem-backed [`DocumentStore`]. A missing file loads as `T::default()`.
pub struct JsonFileStore<T> {
    path: PathBuf,
    lock_timeout: Duration,
    cache_ttl: Duration,
    cache: Mutex<Option<Cached<T>>>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: lock_timeout_from_env(),
            cache_ttl: CACHE_TTL,
            cache: Mutex::new(None),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<doc>.lock` sibling.
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    fn cache_slot(&self) -> std::sync::MutexGuard<'_, Option<Cached<T>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> DocumentStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq + Send,
{
    fn load(&self) -> Result<T, StoreError> {
        {
            let slot = self.cache_slot();
            if let Some(cached) = slot.as_ref() {
                if cached.loaded_at.elapsed() < self.cache_ttl {
                    return Ok(cached.doc.clone());
                }
            }
        }
        let doc = self.load_fresh()?;
        *self.cache_slot() = Some(Cached {
            loaded_at: Instant::now(),
            doc: doc.clone(),
        });
        Ok(doc)
    }

    fn load_fresh(&self) -> Result<T, StoreError> {
        read_document(&self.path)
    }

    fn save(&self, doc: &T) -> Result<(), StoreError> {
        let _guard = LockGuard::acquire(&self.lock_path(), self.lock_timeout)?;
        write_atomic(&self.path, doc)?;
        self.invalidate_cache();
        Ok(())
    }

    fn read_modify_write<R, E, F>(&self, update: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<StoreError>,
    {
        let _guard = LockGuard::acquire(&self.lock_path(), self.lock_timeout)?;
        let before = read_document::<T>(&self.path)?;
        let mut doc = before.clone();
        let out = update(&mut doc)?;
        if doc != before {
            write_atomic(&self.path, &doc)?;
        }
        self.invalidate_cache();
        Ok(out)
    }

    fn invalidate_cache(&self) {
        *self.cache_slot() = None;
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// [`DocumentStore`] held entirely in memory. Used by tests and by callers
/// that want the read-modify-write contract without touching the filesystem.
#[derive(Default)]
pub struct MemoryStore<T> {
    doc: Mutex<T>,
}

impl<T> MemoryStore<T> {
    pub fn new(doc: T) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, T> {
        self.doc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> DocumentStore<T> for MemoryStore<T>
where
    T: Clone + PartialEq + Send,
{
    fn load(&self) -> Result<T, StoreError> {
        Ok(self.slot().clone())
    }

    fn load_fresh(&self) -> Result<T, StoreError> {
        self.load()
    }

    fn save(&self, doc: &T) -> Result<(), StoreError> {
        *self.slot() = doc.clone();
        Ok(())
    }

    fn read_modify_write<R, E, F>(&self, update: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<StoreError>,
    {
        let mut slot = self.slot();
        let mut doc = slot.clone();
        let out = update(&mut doc)?;
        *slot = doc;
        Ok(out)
    }

    fn invalidate_cache(&self) {}
}

// ---------------------------------------------------------------------------
// Lock guard
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on a `.lock` file, released on drop.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Acquire with exponential backoff, giving up after `timeout`.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| io_err(lock_path, e))?;

        let started = Instant::now();
        let mut delay = BACKOFF_START;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if is_contended(&err) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        tracing::warn!(lock = %lock_path.display(), ?waited, "lock acquisition timed out");
                        return Err(StoreError::Busy {
                            path: lock_path.to_path_buf(),
                            waited,
                        });
                    }
                    sleep(delay.min(timeout - waited));
                    delay = (delay * 2).min(BACKOFF_CEILING);
                }
                Err(err) => return Err(io_err(lock_path, err)),
            }
        }

        // Holder pid is diagnostic only; the kernel lock is what excludes.
        let _ = file.set_len(0);
        let _ = writeln!(file, "pid={}", std::process::id());

        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %err, "failed to release lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

// ---------------------------------------------------------------------------
// Read / write helpers
// ---------------------------------------------------------------------------

/// Read and parse `path`; a missing file yields `T::default()`.
pub fn read_document<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize → `.tmp` sibling → fsync → `rename`.
///
/// `.tmp` is always in the same directory as the target (same filesystem, so
/// the rename is atomic). On failure the previous document is left intact.
pub fn write_atomic<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut json = serde_json::to_string_pretty(doc)?;
    json.push('\n');

    let tmp = sibling(path, "tmp");
    let written = File::create(&tmp)
        .and_then(|mut f| f.write_all(json.as_bytes()).and_then(|()| f.sync_all()));
    if let Err(err) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&tmp, err));
    }
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{suffix}"))
}

fn lock_timeout_from_env() -> Duration {
    std::env::var(LOCK_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_LOCK_TIMEOUT)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type Doc = BTreeMap<String, u64>;

    fn store(dir: &TempDir) -> JsonFileStore<Doc> {
        JsonFileStore::new(dir.path().join("doc.json"))
    }

    #[test]
    fn missing_document_loads_default() {
        let dir = TempDir::new().expect("tempdir");
        let doc = store(&dir).load().expect("load");
        assert!(doc.is_empty());
    }

    #[test]
    fn save_then_fresh_load_is_equal() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        let doc: Doc = [("a".to_string(), 1), ("b".to_string(), 2)].into();
        s.save(&doc).expect("save");
        assert_eq!(s.load_fresh().expect("load"), doc);
    }

    #[test]
    fn tmp_file_is_gone_after_write() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save(&Doc::new()).expect("save");
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn cache_serves_stale_copy_until_invalidated() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save(&[("k".to_string(), 1)].into()).expect("save");
        assert_eq!(s.load().expect("load")["k"], 1);

        // Out-of-band write by "another process".
        write_atomic(s.path(), &Doc::from([("k".to_string(), 2)])).expect("write");
        assert_eq!(s.load().expect("cached")["k"], 1);

        s.invalidate_cache();
        assert_eq!(s.load().expect("fresh")["k"], 2);
    }

    #[test]
    fn read_modify_write_bypasses_cache() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save(&[("k".to_string(), 1)].into()).expect("save");
        let _ = s.load().expect("warm cache");
        write_atomic(s.path(), &Doc::from([("k".to_string(), 5)])).expect("write");

        let seen = s
            .read_modify_write(|doc| -> Result<u64, StoreError> {
                let v = doc["k"];
                doc.insert("k".to_string(), v + 1);
                Ok(v)
            })
            .expect("rmw");
        assert_eq!(seen, 5);
        assert_eq!(s.load().expect("load")["k"], 6);
    }

    #[test]
    fn failed_update_writes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save(&[("k".to_string(), 1)].into()).expect("save");
        let before = std::fs::read(s.path()).expect("read");

        let result: Result<(), StoreError> = s.read_modify_write(|doc| {
            doc.clear();
            Err(StoreError::Busy {
                path: PathBuf::from("x"),
                waited: Duration::ZERO,
            })
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read(s.path()).expect("read"), before);
    }

    #[test]
    fn unchanged_update_does_not_rewrite() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.read_modify_write(|_doc| -> Result<(), StoreError> { Ok(()) })
            .expect("rmw");
        assert!(!s.path().exists(), "no-op update must not create the file");
    }

    #[test]
    fn busy_lock_times_out() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir).with_lock_timeout(Duration::from_millis(50));
        let _held = LockGuard::acquire(&s.lock_path(), Duration::from_secs(1)).expect("hold");

        let err = s.save(&Doc::new()).unwrap_err();
        assert!(matches!(err, StoreError::Busy { .. }), "got: {err}");
    }

    #[test]
    fn corrupt_document_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let s = store(&dir);
        std::fs::write(s.path(), b"{ not json").expect("write");
        let err = s.load_fresh().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("doc.json"));
    }

    #[test]
    fn memory_store_rmw_applies_and_rolls_back() {
        let s = MemoryStore::new(Doc::new());
        s.read_modify_write(|d| -> Result<(), StoreError> {
            d.insert("a".into(), 1);
            Ok(())
        })
        .expect("rmw");
        let _: Result<(), StoreError> = s.read_modify_write(|d| {
            d.insert("b".into(), 2);
            Err(StoreError::Json(serde_json::from_str::<u8>("x").unwrap_err()))
        });
        let doc = s.load().expect("load");
        assert_eq!(doc.len(), 1);
        assert_eq!(doc["a"], 1);
    }
}
