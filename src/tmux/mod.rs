//! tmux integration module
//!
//! Sessions are tmux panes living in a tmux server inside each instance's
//! container. Every instance has a single tmux session named [`SESSION_NAME`];
//! the first pane creates it and later panes become new windows.

mod driver;
mod error;
mod utils;

pub use driver::ContainerTmux;
pub use error::{MuxError, Result};
pub use utils::{is_pane_id, strip_ansi};

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

pub const SESSION_NAME: &str = "arbor";

/// What a new pane runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCommand {
    pub command: String,
    pub env: Vec<(String, String)>,
    pub working_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The user detached; the pane keeps running.
    Detached,
    /// The pane's process exited.
    RemoteExited,
    Cancelled,
}

pub trait Multiplexer: Send + Sync {
    /// Start a pane and return its id once tmux acknowledges it.
    fn new_session(&self, container_id: &str, command: &SessionCommand) -> Result<String>;

    /// Hand the terminal to a pane until detach, pane exit or cancellation.
    fn attach(
        &self,
        container_id: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<AttachOutcome>>;

    /// Live pane ids; empty when no tmux server runs.
    fn list_sessions(&self, container_id: &str) -> Result<Vec<String>>;

    /// Succeeds if the pane is already gone.
    fn kill_session(&self, container_id: &str, session_id: &str) -> Result<()>;

    /// Last `lines` lines of a pane's scrollback, without escape codes.
    fn capture(&self, container_id: &str, session_id: &str, lines: usize) -> Result<String>;
}
