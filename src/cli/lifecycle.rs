//! `arbor stop`, `arbor kill` and `arbor rm` command implementations

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::instance::InstanceState;

#[derive(Debug, Args)]
pub struct BranchArgs {
    /// Branch of the instance
    pub branch: String,
}

#[derive(Debug, Args)]
pub struct RmArgs {
    /// Branch of the instance
    pub branch: String,

    /// Remove even if running or the worktree has uncommitted changes
    #[arg(short, long)]
    pub force: bool,
}

pub async fn stop(repo: Option<&Path>, args: BranchArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let inst = orch
        .stop(&args.branch)
        .with_context(|| format!("stop '{}' failed", args.branch))?;

    match inst.state {
        InstanceState::Stopped => println!("✓ Stopped '{}'", inst.branch),
        state => println!("'{}' is {}, nothing to stop", inst.branch, state),
    }
    Ok(())
}

pub async fn kill(repo: Option<&Path>, args: BranchArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let inst = orch
        .kill(&args.branch)
        .with_context(|| format!("kill '{}' failed", args.branch))?;

    match inst.crash_cause {
        Some(cause) => println!("'{}' is {} ({})", inst.branch, inst.state, cause),
        None => println!("✓ Killed '{}'", inst.branch),
    }
    Ok(())
}

pub async fn rm(repo: Option<&Path>, args: RmArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    orch.rm(&args.branch, args.force)
        .with_context(|| format!("rm '{}' failed", args.branch))?;
    println!("✓ Removed '{}'", args.branch);
    Ok(())
}
