//! `arbor ps` command implementation

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::instance::Instance;
use crate::lifecycle::{Orphan, OrphanAction, PsReport};

const TABLE_COL_BRANCH: usize = 24;
const TABLE_COL_STATE: usize = 10;
const TABLE_COL_SESSIONS: usize = 9;
const TABLE_COL_ID_DISPLAY: usize = 12;
const TABLE_COL_PATH: usize = 40;

#[derive(Debug, Args)]
pub struct PsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

fn print_table_header() {
    println!(
        "{:<width_branch$} {:<width_state$} {:<width_sessions$} {:<width_id$} WORKTREE",
        "BRANCH",
        "STATE",
        "SESSIONS",
        "CONTAINER",
        width_branch = TABLE_COL_BRANCH,
        width_state = TABLE_COL_STATE,
        width_sessions = TABLE_COL_SESSIONS,
        width_id = TABLE_COL_ID_DISPLAY,
    );
    println!(
        "{}",
        "-".repeat(
            TABLE_COL_BRANCH
                + TABLE_COL_STATE
                + TABLE_COL_SESSIONS
                + TABLE_COL_ID_DISPLAY
                + TABLE_COL_PATH
                + 4
        )
    );
}

fn state_cell(inst: &Instance) -> String {
    match &inst.crash_cause {
        Some(cause) if cause.needs_recreate() => format!("{}!", inst.state),
        _ => inst.state.to_string(),
    }
}

fn print_table_row(inst: &Instance) {
    let branch = super::truncate(&inst.branch, TABLE_COL_BRANCH);
    let container = if inst.container_id.is_empty() {
        "-"
    } else {
        super::truncate_id(&inst.container_id, TABLE_COL_ID_DISPLAY)
    };
    let path = inst.worktree_path.display().to_string();
    println!(
        "{:<width_branch$} {:<width_state$} {:<width_sessions$} {:<width_id$} {}",
        branch,
        state_cell(inst),
        inst.sessions.len(),
        container,
        super::truncate(&path, TABLE_COL_PATH),
        width_branch = TABLE_COL_BRANCH,
        width_state = TABLE_COL_STATE,
        width_sessions = TABLE_COL_SESSIONS,
        width_id = TABLE_COL_ID_DISPLAY,
    );
    if let Some(cause) = &inst.crash_cause {
        println!("  ↳ {}", cause);
    }
}

fn print_orphan(orphan: &Orphan) {
    let id = super::truncate_id(&orphan.container_id, TABLE_COL_ID_DISPLAY);
    let what = match orphan.action {
        OrphanAction::Adopted => "adopted into its interrupted entry",
        OrphanAction::Removed => "removed",
        OrphanAction::Skipped => "left in place",
    };
    let branch = if orphan.branch.is_empty() {
        "<unlabelled>"
    } else {
        orphan.branch.as_str()
    };
    println!("  {} {} ({}): {}", id, orphan.name, branch, what);
}

fn print_report(report: &PsReport) {
    if report.instances.is_empty() {
        println!("No instances found.");
    } else {
        print_table_header();
        for inst in &report.instances {
            print_table_row(inst);
        }
        println!("\nTotal: {} instances", report.instances.len());
    }

    if !report.orphans.is_empty() {
        println!("\nOrphaned containers:");
        for orphan in &report.orphans {
            print_orphan(orphan);
        }
    }
}

pub async fn run(repo: Option<&Path>, args: PsArgs) -> Result<()> {
    let orch = super::orchestrator(repo)?;
    let report = orch.ps().context("ps failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}
