// Git error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Path is not in a git repository")]
    NotAGitRepo,

    #[error("A worktree for branch '{branch}' already exists at {}", .path.display())]
    WorktreeExists { branch: String, path: PathBuf },

    #[error("Worktree at {} has uncommitted changes (use --force to discard them)", .0.display())]
    WorktreeDirty(PathBuf),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Git error: {0}")]
    Git2(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;
