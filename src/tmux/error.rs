use thiserror::Error;

use crate::containers::RuntimeError;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("tmux pane {0} not found")]
    PaneNotFound(String),

    #[error("tmux {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("tmux returned an unexpected pane id: {0:?}")]
    BadPaneId(String),

    #[error("attach exited with status {0}")]
    AttachFailed(i32),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
