//! File-backed catalog: one JSON document per branch.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::error::{CatalogError, Result};
use super::{check_conflicts, encode_branch, sort_snapshot, Catalog, LockGuard};
use crate::instance::Instance;

const ENTRY_EXT: &str = "json";
const LOCK_EXT: &str = "lock";

pub struct FileCatalog {
    dir: PathBuf,
}

/// Advisory lock held for the guard's lifetime.
struct FileLock {
    file: File,
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

impl FileCatalog {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, branch: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_branch(branch), ENTRY_EXT))
    }

    fn lock_path(&self, branch: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_branch(branch), LOCK_EXT))
    }

    fn read_entry(path: &Path) -> Result<Instance> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| CatalogError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn open_lock_file(&self, branch: &str) -> Result<(File, PathBuf)> {
        let path = self.lock_path(branch);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        Ok((file, path))
    }
}

impl Catalog for FileCatalog {
    fn get(&self, branch: &str) -> Result<Instance> {
        let path = self.entry_path(branch);
        match Self::read_entry(&path) {
            Err(CatalogError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(CatalogError::NotFound(branch.to_string()))
            }
            other => other,
        }
    }

    fn put(&self, instance: &Instance) -> Result<()> {
        let existing = self.find(&instance.branch)?;
        let others = self.list()?;
        check_conflicts(instance, existing.as_ref(), &others)?;

        let json = serde_json::to_vec_pretty(instance).map_err(CatalogError::Encode)?;

        // Same directory as the target so persist() is a plain rename.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        let path = self.entry_path(&instance.branch);
        tmp.persist(&path).map_err(|e| CatalogError::Io(e.error))?;

        debug!(
            "Catalog: wrote {} ({})",
            instance.branch,
            instance.state.as_str()
        );
        Ok(())
    }

    fn delete(&self, branch: &str) -> Result<()> {
        // The lock file stays: other processes may be waiting on it.
        match fs::remove_file(self.entry_path(branch)) {
            Ok(()) => {
                debug!("Catalog: deleted {}", branch);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CatalogError::NotFound(branch.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(instance) => instances.push(instance),
                // Deleted between read_dir and read.
                Err(CatalogError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        sort_snapshot(&mut instances);
        Ok(instances)
    }

    fn lock(&self, branch: &str) -> Result<LockGuard> {
        let (file, path) = self.open_lock_file(branch)?;
        file.lock_exclusive()?;
        debug!("Catalog: locked {}", branch);
        Ok(LockGuard::new(branch, FileLock { file, path }))
    }

    fn try_lock(&self, branch: &str) -> Result<Option<LockGuard>> {
        let (file, path) = self.open_lock_file(branch)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockGuard::new(branch, FileLock { file, path }))),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
