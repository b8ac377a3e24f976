//! Crate-wide error taxonomy.
//!
//! Component errors convert into [`Error`]; the binary maps each kind onto a
//! process exit code with [`Error::exit_code`].

use std::path::PathBuf;

use thiserror::Error;

use crate::agents::Agent;
use crate::catalog::CatalogError;
use crate::containers::RuntimeError;
use crate::credentials::CredentialError;
use crate::git::GitError;
use crate::instance::InstanceState;
use crate::tmux::MuxError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("Instance '{0}' has no sessions")]
    NoSessions(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Worktree {} has uncommitted changes (use --force to discard them)", .0.display())]
    Dirty(PathBuf),

    #[error("No credential stored for {0}. Run `arbor auth {0}` first")]
    NotAuthenticated(Agent),

    #[error("{tool} failed: {source}")]
    External {
        tool: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Cannot {operation} '{branch}' while it is {state}{}", hint_suffix(.hint))]
    StateMismatch {
        branch: String,
        state: InstanceState,
        operation: &'static str,
        hint: Option<&'static str>,
    },

    #[error("Catalog error: {0}")]
    Storage(#[source] CatalogError),
}

pub type Result<T> = std::result::Result<T, Error>;

fn hint_suffix(hint: &Option<&'static str>) -> String {
    hint.map(|h| format!(" ({})", h)).unwrap_or_default()
}

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_NOT_FOUND: i32 = 3;
pub const EXIT_CONFLICT: i32 = 4;
pub const EXIT_NOT_AUTHENTICATED: i32 = 5;
pub const EXIT_EXTERNAL: i32 = 6;

impl Error {
    pub fn mismatch(branch: &str, state: InstanceState, operation: &'static str) -> Self {
        Error::StateMismatch {
            branch: branch.to_string(),
            state,
            operation,
            hint: None,
        }
    }

    pub fn mismatch_hint(
        branch: &str,
        state: InstanceState,
        operation: &'static str,
        hint: &'static str,
    ) -> Self {
        Error::StateMismatch {
            branch: branch.to_string(),
            state,
            operation,
            hint: Some(hint),
        }
    }

    pub fn instance_not_found(branch: &str) -> Self {
        Error::NotFound(format!("No instance for branch '{}'", branch))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_) | Error::NoSessions(_) => EXIT_NOT_FOUND,
            Error::Conflict(_) | Error::Dirty(_) | Error::StateMismatch { .. } => EXIT_CONFLICT,
            Error::NotAuthenticated(_) => EXIT_NOT_AUTHENTICATED,
            Error::External { .. } => EXIT_EXTERNAL,
            Error::Storage(_) => EXIT_FAILURE,
        }
    }
}

impl From<CatalogError> for Error {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(branch) => Error::instance_not_found(&branch),
            CatalogError::Conflict { .. } => Error::Conflict(err.to_string()),
            other => Error::Storage(other),
        }
    }
}

impl From<GitError> for Error {
    fn from(err: GitError) -> Self {
        match err {
            GitError::WorktreeDirty(path) => Error::Dirty(path),
            GitError::WorktreeExists { .. } => Error::Conflict(err.to_string()),
            other => Error::External {
                tool: "git",
                source: Box::new(other),
            },
        }
    }
}

impl From<RuntimeError> for Error {
    fn from(err: RuntimeError) -> Self {
        Error::External {
            tool: "container engine",
            source: Box::new(err),
        }
    }
}

impl From<MuxError> for Error {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::PaneNotFound(id) => Error::NotFound(format!("Session {} not found", id)),
            other => Error::External {
                tool: "tmux",
                source: Box::new(other),
            },
        }
    }
}

impl From<CredentialError> for Error {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotAuthenticated(agent) => Error::NotAuthenticated(agent),
            other => Error::External {
                tool: "credential store",
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::instance_not_found("b").exit_code(), 3);
        assert_eq!(Error::NoSessions("b".into()).exit_code(), 3);
        assert_eq!(Error::Dirty(PathBuf::from("/wt")).exit_code(), 4);
        assert_eq!(
            Error::mismatch("b", InstanceState::Running, "remove").exit_code(),
            4
        );
        assert_eq!(Error::NotAuthenticated(Agent::Claude).exit_code(), 5);
        assert_eq!(Error::from(RuntimeError::DaemonNotRunning).exit_code(), 6);
    }

    #[test]
    fn test_component_errors_map_to_taxonomy() {
        assert!(matches!(
            Error::from(CatalogError::NotFound("x".into())),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from(GitError::WorktreeDirty(PathBuf::from("/wt"))),
            Error::Dirty(_)
        ));
        assert!(matches!(
            Error::from(GitError::NotAGitRepo),
            Error::External { tool: "git", .. }
        ));
        assert!(matches!(
            Error::from(MuxError::PaneNotFound("%1".into())),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from(CredentialError::NotAuthenticated(Agent::Codex)),
            Error::NotAuthenticated(Agent::Codex)
        ));
    }

    #[test]
    fn test_state_mismatch_message() {
        let err = Error::mismatch_hint(
            "feat/auth",
            InstanceState::Crashed,
            "run",
            "use `arbor recreate`",
        );
        assert_eq!(
            err.to_string(),
            "Cannot run 'feat/auth' while it is crashed (use `arbor recreate`)"
        );
        let plain = Error::mismatch("main", InstanceState::Removing, "stop");
        assert_eq!(plain.to_string(), "Cannot stop 'main' while it is removing");
    }
}
