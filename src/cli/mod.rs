//! CLI command implementations

pub mod attach;
pub mod auth;
pub mod definition;
pub mod lifecycle;
pub mod logs;
pub mod ps;
pub mod run;

pub use definition::{Cli, Commands};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::catalog::FileCatalog;
use crate::config::{catalog_dir_for_repo, get_data_dir, Config};
use crate::containers::default_container_runtime;
use crate::credentials::KeychainStore;
use crate::git::GitWorktree;
use crate::lifecycle::{Orchestrator, Settings};
use crate::tmux::{AttachOutcome, ContainerTmux};

/// Wire the production components for the repository containing `repo`
/// (or the current directory).
pub fn orchestrator(repo: Option<&Path>) -> Result<Orchestrator> {
    let config = Config::load()?;
    let start = match repo {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("Could not determine current directory")?,
    };

    let worktrees = GitWorktree::new(&start, &config.worktree.path_template)
        .with_context(|| format!("{} is not inside a git repository", start.display()))?;
    let catalog_dir = catalog_dir_for_repo(&get_data_dir()?, &worktrees.repo_path);
    tracing::debug!("Catalog at {}", catalog_dir.display());
    let catalog = FileCatalog::new(&catalog_dir)
        .with_context(|| format!("Failed to open catalog at {}", catalog_dir.display()))?;

    let settings = Settings {
        repo: worktrees.repo_path.display().to_string(),
        ..Settings::from_config(&config)
    };

    let runtime = Arc::new(default_container_runtime(config.runtime.engine));
    let mux = ContainerTmux::new(runtime.clone());

    Ok(Orchestrator::new(
        Arc::new(catalog),
        runtime,
        Arc::new(worktrees),
        Arc::new(mux),
        Arc::new(KeychainStore::new()),
        settings,
    ))
}

/// Token cancelled on the first Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

pub(crate) fn report_attach(outcome: AttachOutcome, branch: &str, session_id: &str) {
    match outcome {
        AttachOutcome::Detached => {
            println!("Detached from {} in '{}' (still running)", session_id, branch)
        }
        AttachOutcome::RemoteExited => println!("Session {} in '{}' exited", session_id, branch),
        AttachOutcome::Cancelled => println!("Attach to {} cancelled", session_id),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}

pub fn truncate_id(id: &str, max_len: usize) -> &str {
    if id.len() > max_len && id.is_char_boundary(max_len) {
        &id[..max_len]
    } else {
        id
    }
}
