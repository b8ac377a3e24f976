//! Integration tests for the file catalog shared between processes.
//!
//! Each `FileCatalog` opened on the same directory behaves like a separate
//! process: it has its own lock file handles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use agent_arbor::catalog::{Catalog, FileCatalog};
use agent_arbor::instance::{Instance, InstanceState};
use tempfile::TempDir;

fn instance(branch: &str) -> Instance {
    Instance::new(branch, PathBuf::from(format!("/wt/{}", branch)), "img")
}

#[test]
fn test_lock_excludes_other_handles() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("catalog");
    let first = FileCatalog::new(&dir).unwrap();
    let second = FileCatalog::new(&dir).unwrap();

    let guard = first.lock("feat/auth").unwrap();
    assert!(second.try_lock("feat/auth").unwrap().is_none());
    // Other branches are independent.
    assert!(second.try_lock("main").unwrap().is_some());

    drop(guard);
    assert!(second.try_lock("feat/auth").unwrap().is_some());
}

#[test]
fn test_locked_read_modify_write_is_serialized() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("catalog");
    FileCatalog::new(&dir).unwrap().put(&instance("b")).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let dir = dir.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let catalog = FileCatalog::new(&dir).unwrap();
                barrier.wait();
                let _guard = catalog.lock("b").unwrap();
                let mut inst = catalog.get("b").unwrap();
                inst.add_session(agent_arbor::instance::Session::new(
                    format!("%{}", i),
                    None,
                    agent_arbor::instance::SessionMode::Detached,
                ));
                thread::sleep(Duration::from_millis(2));
                catalog.put(&inst).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let inst = FileCatalog::new(&dir).unwrap().get("b").unwrap();
    assert_eq!(inst.sessions.len(), workers, "no update may be lost");
}

#[test]
fn test_readers_never_see_partial_entries() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("catalog");
    let writer = FileCatalog::new(&dir).unwrap();
    let mut inst = instance("hot");
    writer.put(&inst).unwrap();

    let reads = Arc::new(AtomicUsize::new(0));
    let reader = {
        let dir = dir.clone();
        let reads = reads.clone();
        thread::spawn(move || {
            let catalog = FileCatalog::new(&dir).unwrap();
            for _ in 0..200 {
                let seen = catalog.get("hot").unwrap();
                assert_eq!(seen.branch, "hot");
                assert_eq!(catalog.list().unwrap().len(), 1);
                reads.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    for i in 0..200 {
        if i % 2 == 0 {
            inst.mark_created(&format!("{:064x}", 1));
        } else {
            inst.mark_removing();
        }
        writer.put(&inst).unwrap();
    }
    reader.join().unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 200);
}

#[test]
fn test_entries_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("catalog");
    {
        let catalog = FileCatalog::new(&dir).unwrap();
        let mut inst = instance("feat/persist");
        inst.mark_created("abc123");
        inst.mark_running();
        catalog.put(&inst).unwrap();
    }

    let reopened = FileCatalog::new(&dir).unwrap();
    let inst = reopened.get("feat/persist").unwrap();
    assert_eq!(inst.state, InstanceState::Running);
    assert_eq!(inst.container_id, "abc123");
}
