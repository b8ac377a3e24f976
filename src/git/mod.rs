// Git worktree operations module

use std::path::{Path, PathBuf};
use std::process::Command;

pub mod error;
pub mod template;

pub use error::{GitError, Result};
use template::{normalize_path, resolve_template, TemplateVars};

/// One worktree as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub is_detached: bool,
}

/// Creates and removes one worktree per branch.
pub trait WorktreeManager: Send + Sync {
    /// Deterministic worktree location for `branch`.
    fn path_for(&self, branch: &str) -> Result<PathBuf>;

    /// Create the worktree for `branch` at [`WorktreeManager::path_for`],
    /// creating the branch from `HEAD` if it does not exist yet.
    fn create(&self, branch: &str) -> Result<PathBuf>;

    /// Remove a worktree. Succeeds if it is already gone.
    fn remove(&self, path: &Path, force: bool) -> Result<()>;

    fn is_dirty(&self, path: &Path) -> Result<bool>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Shared git directory a worktree's `.git` file points into, if any.
    /// Mounted at the same path inside containers so git works there.
    fn git_common_dir(&self) -> Option<PathBuf> {
        None
    }
}

pub struct GitWorktree {
    pub repo_path: PathBuf,
    path_template: String,
}

impl GitWorktree {
    pub fn new(repo_path: &Path, path_template: &str) -> Result<Self> {
        let repo_path = Self::find_main_repo(repo_path)?;
        Ok(Self {
            repo_path,
            path_template: path_template.to_string(),
        })
    }

    pub fn is_git_repo(path: &Path) -> bool {
        git2::Repository::discover(path).is_ok()
    }

    /// Root of the main checkout, even when `path` is inside a linked worktree.
    pub fn find_main_repo(path: &Path) -> Result<PathBuf> {
        let repo = git2::Repository::discover(path).map_err(|_| GitError::NotAGitRepo)?;
        if repo.is_bare() {
            return Ok(repo.path().to_path_buf());
        }
        let common = repo.commondir();
        let root = common.parent().ok_or(GitError::NotAGitRepo)?;
        Ok(normalize_path(root))
    }

    fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        tracing::debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()?;
        Ok(output)
    }

    fn git_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let stdout = self.git_checked(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&stdout))
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = git2::Repository::open(&self.repo_path)?;
        let exists = repo.find_branch(branch, git2::BranchType::Local).is_ok();
        Ok(exists)
    }

    fn path_str(path: &Path) -> Result<&str> {
        path.to_str().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid path").into()
        })
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| p.canonicalize().unwrap_or_else(|_| normalize_path(p));
    canon(a) == canon(b)
}

pub(crate) fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
                is_detached: false,
            });
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                let name = reference.strip_prefix("refs/heads/").unwrap_or(reference);
                entry.branch = Some(name.to_string());
            }
        } else if line == "detached" {
            if let Some(entry) = current.as_mut() {
                entry.is_detached = true;
            }
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

impl WorktreeManager for GitWorktree {
    fn path_for(&self, branch: &str) -> Result<PathBuf> {
        let repo_name = self
            .repo_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("repo")
            .to_string();

        let vars = TemplateVars {
            repo_name,
            branch: branch.to_string(),
            base_path: self.repo_path.clone(),
        };

        Ok(resolve_template(&self.path_template, &vars))
    }

    fn create(&self, branch: &str) -> Result<PathBuf> {
        let path = self.path_for(branch)?;

        let existing = self
            .list_worktrees()?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch) || same_path(&wt.path, &path));
        if let Some(wt) = existing {
            return Err(GitError::WorktreeExists {
                branch: branch.to_string(),
                path: wt.path,
            });
        }
        if path.exists() {
            return Err(GitError::WorktreeExists {
                branch: branch.to_string(),
                path,
            });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = Self::path_str(&path)?;
        if self.branch_exists(branch)? {
            self.git_checked(&["worktree", "add", path_str, branch])?;
        } else {
            self.git_checked(&["worktree", "add", "-b", branch, path_str])?;
        }

        tracing::info!("Created worktree for '{}' at {}", branch, path.display());
        Ok(path)
    }

    fn remove(&self, path: &Path, force: bool) -> Result<()> {
        if !path.exists() {
            // Drop git's bookkeeping for a directory removed behind our back.
            if let Err(e) = self.git_checked(&["worktree", "prune"]) {
                tracing::warn!("git worktree prune failed: {}", e);
            }
            return Ok(());
        }

        if !force && self.is_dirty(path)? {
            return Err(GitError::WorktreeDirty(path.to_path_buf()));
        }

        let path_str = Self::path_str(path)?;
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str);
        self.git_checked(&args)?;

        tracing::info!("Removed worktree {}", path.display());
        Ok(())
    }

    fn git_common_dir(&self) -> Option<PathBuf> {
        let repo = git2::Repository::open(&self.repo_path).ok()?;
        Some(normalize_path(repo.commondir()))
    }

    fn is_dirty(&self, path: &Path) -> Result<bool> {
        let repo = git2::Repository::open(path)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .any(|s| s.status() != git2::Status::CURRENT && !s.status().is_ignored()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_repo() -> (TempDir, git2::Repository) {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("app");
        let repo = git2::Repository::init(&repo_path).unwrap();

        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        std::fs::write(repo_path.join("README.md"), "hello\n").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };
        {
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
                .unwrap();
        }

        (dir, repo)
    }

    fn manager(dir: &TempDir) -> GitWorktree {
        GitWorktree::new(&dir.path().join("app"), "../{repo-name}-worktrees/{branch}").unwrap()
    }

    #[test]
    fn test_is_git_repo_returns_false_for_non_git_directory() {
        let dir = TempDir::new().unwrap();
        assert!(!GitWorktree::is_git_repo(dir.path()));
        assert!(matches!(
            GitWorktree::new(dir.path(), "{branch}"),
            Err(GitError::NotAGitRepo)
        ));
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);

        let a = wt.path_for("feat/auth").unwrap();
        let b = wt.path_for("feat/auth").unwrap();
        assert_eq!(a, b);
        assert!(a
            .to_string_lossy()
            .contains("app-worktrees/feat-auth-"));
        assert!(a.is_absolute());
    }

    #[test]
    fn test_git_common_dir_of_checkout_is_dot_git() {
        let (dir, _repo) = setup_test_repo();
        let common = manager(&dir).git_common_dir().unwrap();
        assert_eq!(
            common.canonicalize().unwrap(),
            dir.path().join("app/.git").canonicalize().unwrap()
        );
    }

    #[test]
    fn test_git_common_dir_of_bare_repo_is_repo_itself() {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("app.git");
        git2::Repository::init_bare(&bare).unwrap();

        let wt = GitWorktree::new(&bare, "../{branch}").unwrap();
        let common = wt.git_common_dir().unwrap();
        assert_eq!(common.canonicalize().unwrap(), bare.canonicalize().unwrap());
        assert!(!common.ends_with(".git/.git"));
    }

    #[test]
    fn test_create_makes_new_branch_and_worktree() {
        let (dir, repo) = setup_test_repo();
        let wt = manager(&dir);

        let path = wt.create("feat/auth").unwrap();

        assert!(path.join("README.md").exists());
        assert!(repo
            .find_branch("feat/auth", git2::BranchType::Local)
            .is_ok());
        let listed = wt.list_worktrees().unwrap();
        assert!(listed
            .iter()
            .any(|e| e.branch.as_deref() == Some("feat/auth")));
    }

    #[test]
    fn test_create_uses_existing_branch() {
        let (dir, repo) = setup_test_repo();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("existing", &commit, false).unwrap();

        let path = manager(&dir).create("existing").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_create_twice_fails_with_worktree_exists() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);

        wt.create("feature").unwrap();
        assert!(matches!(
            wt.create("feature"),
            Err(GitError::WorktreeExists { .. })
        ));
    }

    #[test]
    fn test_create_fails_when_path_is_occupied() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);

        std::fs::create_dir_all(wt.path_for("occupied").unwrap()).unwrap();
        assert!(matches!(
            wt.create("occupied"),
            Err(GitError::WorktreeExists { .. })
        ));
    }

    #[test]
    fn test_remove_clean_worktree() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);
        let path = wt.create("removable").unwrap();

        assert!(!wt.is_dirty(&path).unwrap());
        wt.remove(&path, false).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_dirty_worktree_requires_force() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);
        let path = wt.create("dirty").unwrap();

        std::fs::write(path.join("README.md"), "changed\n").unwrap();
        assert!(wt.is_dirty(&path).unwrap());
        assert!(matches!(
            wt.remove(&path, false),
            Err(GitError::WorktreeDirty(_))
        ));
        assert!(path.exists());

        wt.remove(&path, true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_untracked_file_counts_as_dirty() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);
        let path = wt.create("untracked").unwrap();

        std::fs::write(path.join("notes.txt"), "scratch").unwrap();
        assert!(wt.is_dirty(&path).unwrap());
    }

    #[test]
    fn test_remove_missing_path_is_idempotent() {
        let (dir, _repo) = setup_test_repo();
        let wt = manager(&dir);
        let path = wt.create("gone").unwrap();

        std::fs::remove_dir_all(&path).unwrap();
        wt.remove(&path, false).unwrap();
        wt.remove(&path, false).unwrap();

        // Pruned metadata lets the branch get a worktree again.
        wt.create("gone").unwrap();
    }

    #[test]
    fn test_parse_worktree_list() {
        let porcelain = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\n\
                         worktree /wt/feat\nHEAD def\nbranch refs/heads/feat/x\n\n\
                         worktree /wt/detached\nHEAD 123\ndetached\n";
        let entries = parse_worktree_list(porcelain);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("feat/x"));
        assert_eq!(entries[1].path, PathBuf::from("/wt/feat"));
        assert!(entries[2].is_detached);
        assert_eq!(entries[2].branch, None);
    }
}
