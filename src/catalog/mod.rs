//! Instance catalog: the durable branch -> instance record.
//!
//! The catalog is the single source of truth that every command reconciles
//! against the live runtime. Mutations happen under a per-branch lock taken
//! with [`Catalog::lock`], which spans processes for the file backend.

use std::fmt;

use crate::instance::Instance;

pub mod error;
pub mod file;
pub mod memory;

pub use error::{CatalogError, Result};
pub use file::FileCatalog;
pub use memory::MemoryCatalog;

/// Exclusive hold on one branch. Released when dropped.
pub struct LockGuard {
    branch: String,
    _inner: Box<dyn Send>,
}

impl LockGuard {
    pub(crate) fn new(branch: &str, inner: impl Send + 'static) -> Self {
        Self {
            branch: branch.to_string(),
            _inner: Box::new(inner),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("branch", &self.branch)
            .finish()
    }
}

pub trait Catalog: Send + Sync {
    /// Fails with [`CatalogError::NotFound`] for unknown branches.
    fn get(&self, branch: &str) -> Result<Instance>;

    /// Atomically insert or replace the entry for `instance.branch`.
    fn put(&self, instance: &Instance) -> Result<()>;

    fn delete(&self, branch: &str) -> Result<()>;

    /// Snapshot ordered by `created_at`, then branch.
    fn list(&self) -> Result<Vec<Instance>>;

    /// Block until the branch lock is held.
    fn lock(&self, branch: &str) -> Result<LockGuard>;

    /// `None` if someone else holds the lock.
    fn try_lock(&self, branch: &str) -> Result<Option<LockGuard>>;

    fn find(&self, branch: &str) -> Result<Option<Instance>> {
        match self.get(branch) {
            Ok(instance) => Ok(Some(instance)),
            Err(CatalogError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Conflict rules shared by the backends: a branch's container id is only
/// replaced through an empty id, and worktree paths are never shared.
pub(crate) fn check_conflicts(
    incoming: &Instance,
    existing: Option<&Instance>,
    others: &[Instance],
) -> Result<()> {
    if let Some(current) = existing {
        if current.has_container()
            && incoming.has_container()
            && current.container_id != incoming.container_id
        {
            return Err(CatalogError::Conflict {
                branch: incoming.branch.clone(),
                reason: format!("entry already owns container {}", current.container_id),
            });
        }
    }

    if let Some(owner) = others
        .iter()
        .find(|o| o.branch != incoming.branch && o.worktree_path == incoming.worktree_path)
    {
        return Err(CatalogError::Conflict {
            branch: incoming.branch.clone(),
            reason: format!(
                "worktree {} belongs to branch '{}'",
                incoming.worktree_path.display(),
                owner.branch
            ),
        });
    }

    Ok(())
}

pub(crate) fn sort_snapshot(instances: &mut [Instance]) {
    instances.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.branch.cmp(&b.branch))
    });
}

/// Lossless, filesystem-safe file stem for a branch name.
pub fn encode_branch(branch: &str) -> String {
    let mut out = String::with_capacity(branch.len());
    for byte in branch.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_encode_branch_is_lossless() {
        assert_eq!(encode_branch("feat/a"), "feat%2Fa");
        assert_eq!(encode_branch("feat-a"), "feat-a");
        assert_ne!(encode_branch("feat/a"), encode_branch("feat-a"));
        assert_eq!(encode_branch("a%b"), "a%25b");
        assert_eq!(encode_branch("ü"), "%C3%BC");
    }

    #[test]
    fn test_check_conflicts_container_id() {
        let mut current = Instance::new("b", PathBuf::from("/wt/b"), "img");
        current.mark_created("one");

        let mut incoming = current.clone();
        incoming.container_id = "two".to_string();
        assert!(matches!(
            check_conflicts(&incoming, Some(&current), &[]),
            Err(CatalogError::Conflict { .. })
        ));

        incoming.mark_removing();
        assert!(check_conflicts(&incoming, Some(&current), &[]).is_ok());
    }

    #[test]
    fn test_check_conflicts_shared_worktree() {
        let other = Instance::new("a", PathBuf::from("/wt/x"), "img");
        let incoming = Instance::new("b", PathBuf::from("/wt/x"), "img");
        assert!(check_conflicts(&incoming, None, std::slice::from_ref(&other)).is_err());

        let same_branch = Instance::new("a", PathBuf::from("/wt/x"), "img");
        assert!(check_conflicts(&same_branch, Some(&other), &[other.clone()]).is_ok());
    }
}
