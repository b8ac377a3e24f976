//! `arbor attach` command implementation

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

#[derive(Debug, Args)]
pub struct AttachArgs {
    /// Branch of the instance
    pub branch: String,

    /// Pane id of the session (defaults to the most recent one)
    #[arg(short, long)]
    pub session: Option<String>,
}

pub async fn run(repo: Option<&Path>, args: AttachArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let outcome = orch
        .attach(&args.branch, args.session.as_deref(), super::ctrl_c_token())
        .await
        .with_context(|| format!("attach to '{}' failed", args.branch))?;

    let session = args.session.as_deref().unwrap_or("latest session");
    super::report_attach(outcome, &args.branch, session);
    Ok(())
}
