//! Recovery reconciler: repairs catalog drift before every command.
//!
//! Containers get killed out of band, worktrees get deleted by hand and
//! processes die mid-creation. Reconciliation observes what is really there
//! and records it (usually as `Crashed` with a cause); it never deletes an
//! entry and never touches external state, apart from the orphan sweep.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::containers::RuntimeError;
use crate::error::Result;
use crate::instance::{CrashCause, Instance, InstanceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanAction {
    /// Attached to the interrupted `Creating` entry of its branch.
    Adopted,
    Removed,
    /// Left alone: branch busy, unlabelled, or owned by a different container.
    Skipped,
}

/// A managed container that no catalog entry referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub container_id: String,
    pub name: String,
    pub branch: String,
    pub action: OrphanAction,
}

/// Engines print short or full ids depending on the command.
fn same_container(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.starts_with(b) || b.starts_with(a))
}

impl Orchestrator {
    /// Reconcile `branch` (or every entry when `None`), then run `op`.
    pub(crate) fn reconciled<T>(
        &self,
        branch: Option<&str>,
        op: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        match branch {
            Some(branch) => self.reconcile_branch(branch)?,
            None => {
                self.reconcile_all()?;
            }
        }
        op()
    }

    /// Reconcile every entry; returns the resulting snapshot.
    pub fn reconcile_all(&self) -> Result<Vec<Instance>> {
        for instance in self.catalog.list()? {
            self.reconcile_branch(&instance.branch)?;
        }
        Ok(self.catalog.list()?)
    }

    pub(crate) fn reconcile_branch(&self, branch: &str) -> Result<()> {
        if self.catalog.find(branch)?.is_none() {
            return Ok(());
        }

        let _lock = self.catalog.lock(branch)?;
        let Some(mut instance) = self.catalog.find(branch)? else {
            return Ok(());
        };

        let before = instance.clone();
        self.observe(&mut instance);
        if instance != before {
            if before.state != instance.state {
                info!(
                    "Reconciled '{}': {} -> {}{}",
                    branch,
                    before.state,
                    instance.state,
                    instance
                        .crash_cause
                        .map(|c| format!(" ({})", c))
                        .unwrap_or_default()
                );
            }
            self.catalog.put(&instance)?;
        }
        Ok(())
    }

    /// Apply live observations to one entry in place.
    pub(crate) fn observe(&self, instance: &mut Instance) {
        let worktree_present = self.worktrees.exists(&instance.worktree_path);

        match instance.state {
            InstanceState::Creating => {
                if !worktree_present {
                    instance.crash_cause = Some(CrashCause::WorktreeMissing);
                }
                return;
            }
            InstanceState::Removing => return,
            InstanceState::Running | InstanceState::Stopped | InstanceState::Crashed => {}
        }

        match self.runtime.inspect(&instance.container_id) {
            Err(RuntimeError::NotFound(_)) => {
                instance.mark_crashed(CrashCause::ContainerMissing);
            }
            Err(e) => {
                warn!(
                    "Could not inspect container for '{}', leaving it as {}: {}",
                    instance.branch, instance.state, e
                );
                return;
            }
            Ok(live) => match instance.state {
                InstanceState::Running if !live.running => {
                    instance.mark_crashed(CrashCause::ContainerExited {
                        exit_code: live.exit_code,
                    });
                }
                InstanceState::Running => {
                    match self.mux.list_sessions(&instance.container_id) {
                        Ok(panes) => {
                            if instance.retain_live_sessions(&panes) {
                                debug!("Pruned exited sessions of '{}'", instance.branch);
                            }
                        }
                        Err(e) => warn!("Could not list panes for '{}': {}", instance.branch, e),
                    }
                    instance.touch();
                }
                InstanceState::Stopped if live.running => instance.mark_running(),
                _ => {}
            },
        }

        if !worktree_present {
            instance.mark_crashed(CrashCause::WorktreeMissing);
        }
    }

    /// Deal with labelled containers that no entry references.
    pub(crate) fn sweep_orphans(&self) -> Result<Vec<Orphan>> {
        let managed = match self.runtime.list_managed() {
            Ok(managed) => managed,
            Err(e) => {
                warn!("Skipping orphan sweep: {}", e);
                return Ok(Vec::new());
            }
        };

        let entries = self.catalog.list()?;
        let mut orphans = Vec::new();

        for container in managed {
            if container.repo != self.settings.repo {
                continue;
            }
            if entries
                .iter()
                .any(|e| same_container(&e.container_id, &container.id))
            {
                continue;
            }

            let action = self.settle_orphan(&container.id, &container.branch)?;
            orphans.push(Orphan {
                container_id: container.id,
                name: container.name,
                branch: container.branch,
                action,
            });
        }

        Ok(orphans)
    }

    fn settle_orphan(&self, container_id: &str, branch: &str) -> Result<OrphanAction> {
        if branch.is_empty() {
            return Ok(OrphanAction::Skipped);
        }
        // A run in progress holds the lock while its container has no entry yet.
        let Some(_lock) = self.catalog.try_lock(branch)? else {
            return Ok(OrphanAction::Skipped);
        };

        match self.catalog.find(branch)? {
            Some(mut instance)
                if instance.state == InstanceState::Creating && !instance.has_container() =>
            {
                instance.mark_created(container_id);
                instance.crash_cause = None;
                self.catalog.put(&instance)?;
                info!("Adopted container {} into '{}'", container_id, branch);
                Ok(OrphanAction::Adopted)
            }
            Some(_) => Ok(OrphanAction::Skipped),
            None => {
                match self.runtime.remove(container_id, true) {
                    Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                    Err(e) => {
                        warn!("Failed to remove orphan container {}: {}", container_id, e);
                        return Ok(OrphanAction::Skipped);
                    }
                }
                info!("Removed orphan container {} ({})", container_id, branch);
                Ok(OrphanAction::Removed)
            }
        }
    }
}
