//! Command-line surface

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use super::attach::AttachArgs;
use super::auth::AuthArgs;
use super::lifecycle::{BranchArgs, RmArgs};
use super::logs::LogsArgs;
use super::ps::PsArgs;
use super::run::{RecreateArgs, RunArgs};

/// Run AI coding agents in branch-scoped containers
#[derive(Debug, Parser)]
#[command(name = "arbor", version, about)]
pub struct Cli {
    /// Repository to operate on (defaults to the current directory)
    #[arg(long, global = true, env = "ARBOR_REPO")]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start an agent session on a branch, creating the instance if needed
    Run(RunArgs),

    /// Attach to a running session
    Attach(AttachArgs),

    /// List instances and their sessions
    Ps(PsArgs),

    /// Show container output and recent pane contents
    Logs(LogsArgs),

    /// Stop an instance's container gracefully
    Stop(BranchArgs),

    /// Kill an instance's container immediately
    Kill(BranchArgs),

    /// Remove an instance: container, worktree and record
    Rm(RmArgs),

    /// Remove and run an instance again from scratch
    Recreate(RecreateArgs),

    /// Store, inspect or clear an agent's credential
    Auth(AuthArgs),

    /// Print shell completions
    Completion {
        /// Target shell
        shell: Shell,
    },
}
