//! agent-arbor library: branch-scoped containers running AI coding agents.
//!
//! One [`instance::Instance`] per git branch pairs a worktree with a
//! container; the [`lifecycle::Orchestrator`] keeps the persisted catalog and
//! the real world in step.

pub mod agents;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod containers;
pub mod credentials;
pub mod error;
pub mod git;
pub mod instance;
pub mod lifecycle;
pub mod tmux;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{Error, Result};
