//! `arbor logs` command implementation

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Branch of the instance
    pub branch: String,

    /// Number of trailing lines per source
    #[arg(short = 'n', long, default_value_t = 50)]
    pub lines: usize,
}

pub async fn run(repo: Option<&Path>, args: LogsArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let report = orch
        .logs(&args.branch, args.lines)
        .with_context(|| format!("logs for '{}' failed", args.branch))?;

    let inst = &report.instance;
    match &inst.crash_cause {
        Some(cause) => println!("{}: {} ({})", inst.branch, inst.state, cause),
        None => println!("{}: {}", inst.branch, inst.state),
    }

    match &report.container_logs {
        Some(text) => {
            println!("\n═══ container ═══");
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }
        None => println!("\n(no container logs)"),
    }

    for pane in &report.panes {
        println!("\n═══ {} ({}) ═══", pane.session.id, pane.session.label());
        println!("{}", pane.output.trim_end());
    }
    Ok(())
}
