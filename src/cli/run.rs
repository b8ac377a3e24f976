//! `arbor run` and `arbor recreate` command implementation

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::agents::Agent;
use crate::lifecycle::{RunOutcome, RunRequest};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Branch to work on (created from HEAD if it does not exist)
    pub branch: String,

    /// Agent to launch; omit for a plain shell
    #[arg(short, long, value_enum, ignore_case = true)]
    pub agent: Option<Agent>,

    /// Start the session in the background
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Initial prompt for the agent
    pub prompt: Option<String>,
}

#[derive(Debug, Args)]
pub struct RecreateArgs {
    /// Branch whose instance to rebuild
    pub branch: String,

    /// Agent to launch (defaults to the agent of the most recent session)
    #[arg(short, long, value_enum, ignore_case = true)]
    pub agent: Option<Agent>,

    /// Start the session in the background
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Initial prompt for the agent
    pub prompt: Option<String>,
}

fn print_outcome(outcome: &RunOutcome) {
    let started = &outcome.started;
    let inst = &started.instance;

    if started.created {
        println!(
            "✓ Created instance '{}' at {}",
            inst.branch,
            inst.worktree_path.display()
        );
    }
    println!(
        "✓ Started {} session {} in '{}'",
        started.session.label(),
        started.session.id,
        inst.branch
    );

    match outcome.attach {
        Some(attach) => super::report_attach(attach, &inst.branch, &started.session.id),
        None => println!(
            "  Attach with: arbor attach {} --session {}",
            inst.branch, started.session.id
        ),
    }
}

pub async fn run(repo: Option<&Path>, args: RunArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let req = RunRequest {
        branch: args.branch,
        agent: args.agent,
        prompt: args.prompt,
        detached: args.detach,
    };

    let outcome = orch
        .run(&req, super::ctrl_c_token())
        .await
        .with_context(|| format!("run '{}' failed", req.branch))?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn recreate(repo: Option<&Path>, args: RecreateArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let req = RunRequest {
        branch: args.branch,
        agent: args.agent,
        prompt: args.prompt,
        detached: args.detach,
    };

    let outcome = orch
        .recreate(&req, super::ctrl_c_token())
        .await
        .with_context(|| format!("recreate '{}' failed", req.branch))?;
    println!("✓ Recreated '{}'", req.branch);
    print_outcome(&outcome);
    Ok(())
}
