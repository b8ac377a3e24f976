//! In-memory catalog with the same locking semantics as [`super::FileCatalog`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::error::{CatalogError, Result};
use super::{check_conflicts, sort_snapshot, Catalog, LockGuard};
use crate::instance::Instance;

#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct MemoryLock {
    table: Arc<LockTable>,
    branch: String,
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.table.held().remove(&self.branch);
        self.table.released.notify_all();
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    entries: Mutex<HashMap<String, Instance>>,
    locks: Arc<LockTable>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instance>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guard(&self, branch: &str) -> LockGuard {
        LockGuard::new(
            branch,
            MemoryLock {
                table: Arc::clone(&self.locks),
                branch: branch.to_string(),
            },
        )
    }
}

impl Catalog for MemoryCatalog {
    fn get(&self, branch: &str) -> Result<Instance> {
        self.entries()
            .get(branch)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(branch.to_string()))
    }

    fn put(&self, instance: &Instance) -> Result<()> {
        let mut entries = self.entries();
        let others: Vec<Instance> = entries.values().cloned().collect();
        check_conflicts(instance, entries.get(&instance.branch), &others)?;
        entries.insert(instance.branch.clone(), instance.clone());
        Ok(())
    }

    fn delete(&self, branch: &str) -> Result<()> {
        self.entries()
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(branch.to_string()))
    }

    fn list(&self) -> Result<Vec<Instance>> {
        let mut instances: Vec<Instance> = self.entries().values().cloned().collect();
        sort_snapshot(&mut instances);
        Ok(instances)
    }

    fn lock(&self, branch: &str) -> Result<LockGuard> {
        let mut held = self.locks.held();
        while held.contains(branch) {
            held = self
                .locks
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(branch.to_string());
        drop(held);
        Ok(self.guard(branch))
    }

    fn try_lock(&self, branch: &str) -> Result<Option<LockGuard>> {
        let mut held = self.locks.held();
        if !held.insert(branch.to_string()) {
            return Ok(None);
        }
        drop(held);
        Ok(Some(self.guard(branch)))
    }
}
