//! Registry behaviour against the real JSON file store.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use assert_fs::prelude::*;
use ensemble_core::{
    lockfile, DocumentStore, JsonFileStore, Layout, Registry, RegistryError, SessionId,
    SessionRegistry, ThreadType, TransitionOptions,
};
use predicates::prelude::predicate;

fn open(root: &Path) -> SessionRegistry {
    SessionRegistry::open(root).expect("open registry")
}

// ---------------------------------------------------------------------------
// 1. register
// ---------------------------------------------------------------------------

#[test]
fn register_same_path_keeps_id_and_next_id_advances_per_new_path() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child("a").create_dir_all().expect("mkdir a");
    root.child("b").create_dir_all().expect("mkdir b");
    let reg = open(root.path());

    let first = reg.register(&root.path().join("a"), None).expect("register a");
    assert_eq!(first.id, SessionId(1));
    assert!(first.is_new);

    let again = reg.register(&root.path().join("a"), None).expect("register a again");
    assert_eq!(again.id, SessionId(1));
    assert!(!again.is_new);

    let second = reg.register(&root.path().join("b"), None).expect("register b");
    assert_eq!(second.id, SessionId(2));
    assert!(second.is_new);

    assert_eq!(reg.load().expect("load").next_id, 3);
    root.child(".ensemble/registry.json")
        .assert(predicate::path::exists());
}

#[test]
fn registry_auto_initialises_with_project_name() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child("wt").create_dir_all().expect("mkdir");
    let reg = open(root.path());
    assert!(reg.list().expect("list").sessions.is_empty());

    reg.register(&root.path().join("wt"), None).expect("register");
    let doc = reg.load().expect("load");
    assert_eq!(doc.schema_version, 1);
    assert_eq!(doc.project_name, Layout::new(root.path()).default_project_name());
}

// ---------------------------------------------------------------------------
// 2. delete
// ---------------------------------------------------------------------------

#[test]
fn next_id_is_never_reissued_after_delete() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let reg = open(root.path());
    for name in ["a", "b", "c"] {
        root.child(name).create_dir_all().expect("mkdir");
        reg.register(&root.path().join(name), None).expect("register");
    }
    reg.delete(SessionId(3), false).expect("delete 3");
    assert!(lockfile::read(&reg.layout().locks_dir(), SessionId(3)).is_none());

    root.child("d").create_dir_all().expect("mkdir");
    let d = reg.register(&root.path().join("d"), None).expect("register d");
    assert_eq!(d.id, SessionId(4));
    assert_eq!(reg.load().expect("load").next_id, 5);
}

#[test]
fn deleting_main_always_fails() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let reg = open(root.path());
    let main = reg.register(root.path(), None).expect("register main");
    assert!(main.session.is_main);

    for also_worktree in [false, true] {
        let err = reg.delete(main.id, also_worktree).unwrap_err();
        assert!(matches!(err, RegistryError::CannotDeleteMain(id) if id == main.id), "got: {err}");
    }
    assert!(reg.get(main.id).expect("get").is_some());
}

#[test]
fn delete_unknown_is_not_found() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let err = open(root.path()).delete(SessionId(42), false).unwrap_err();
    assert!(matches!(err, RegistryError::SessionNotFound(SessionId(42))));
    assert!(err.to_string().contains("42"));
}

// ---------------------------------------------------------------------------
// 3. transition_thread
// ---------------------------------------------------------------------------

#[test]
fn noop_transition_does_not_write() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child("wt").create_dir_all().expect("mkdir");
    let reg = open(root.path());
    let id = reg.register(&root.path().join("wt"), None).expect("register").id;
    let before = std::fs::read(reg.layout().registry_path()).expect("read");

    let out = reg
        .transition_thread(id, "parallel", TransitionOptions::default())
        .expect("transition");
    assert!(out.noop);
    assert!(!out.forced);
    assert_eq!(std::fs::read(reg.layout().registry_path()).expect("read"), before);
}

#[test]
fn invalid_transition_leaves_type_unless_forced() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child("wt").create_dir_all().expect("mkdir");
    let reg = open(root.path());
    let id = reg.register(&root.path().join("wt"), None).expect("register").id;

    let err = reg
        .transition_thread(id, "big", TransitionOptions::default())
        .unwrap_err();
    assert!(
        matches!(err, RegistryError::InvalidTransition { from: ThreadType::Parallel, to: ThreadType::Big, .. }),
        "got: {err}"
    );
    assert_eq!(reg.require(id).expect("get").thread_type(), ThreadType::Parallel);

    let out = reg
        .transition_thread(id, "big", TransitionOptions { force: true })
        .expect("forced");
    assert!(out.forced);
    assert_eq!(reg.require(id).expect("get").thread_type(), ThreadType::Big);
}

// ---------------------------------------------------------------------------
// 4. concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_read_modify_write_loses_no_updates() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let path = root.path().join("registry.json");
    let workers = 8;
    let per_worker = 10;

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                // One store per thread, as separate processes would have.
                let store: JsonFileStore<Registry> = JsonFileStore::new(path);
                for _ in 0..per_worker {
                    store
                        .read_modify_write(|reg| -> Result<(), RegistryError> {
                            reg.allocate_id();
                            Ok(())
                        })
                        .expect("rmw");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }

    let store: JsonFileStore<Registry> = JsonFileStore::new(&path);
    let doc = store.load_fresh().expect("load");
    assert_eq!(doc.next_id, 1 + (workers * per_worker) as u64);
}

#[test]
fn concurrent_registers_from_distinct_paths_get_distinct_ids() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let reg = Arc::new(open(root.path()));
    let handles: Vec<_> = (0..6)
        .map(|n| {
            let dir = root.path().join(format!("wt{n}"));
            std::fs::create_dir_all(&dir).expect("mkdir");
            let reg = Arc::clone(&reg);
            thread::spawn(move || reg.register(&dir, None).expect("register").id)
        })
        .collect();
    let mut ids: Vec<SessionId> = handles.into_iter().map(|h| h.join().expect("join")).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
    assert_eq!(reg.list().expect("list").sessions.len(), 6);
}

// ---------------------------------------------------------------------------
// 5. list
// ---------------------------------------------------------------------------

#[test]
fn list_is_sorted_and_reaps_dead_locks() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let reg = open(root.path());
    for name in ["x", "y", "z"] {
        root.child(name).create_dir_all().expect("mkdir");
        reg.register(&root.path().join(name), None).expect("register");
    }
    root.child(".ensemble/locks/session-99.lock")
        .write_str("pid=0\nstarted=0\n")
        .expect("stale lock");

    let listing = reg.list().expect("list");
    let ids: Vec<u64> = listing.sessions.iter().map(|s| s.id.0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(listing.cleaned, 1);
    root.child(".ensemble/locks/session-99.lock")
        .assert(predicate::path::missing());
    root.child(".ensemble/locks/session-1.lock")
        .assert(predicate::path::exists());
}
