//! In-memory stand-ins for the container runtime, git worktrees and tmux.
//!
//! Compiled for unit tests and for integration tests through the
//! `test-support` feature.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::containers::{
    ContainerRuntimeInterface, ContainerSpec, ContainerState, ManagedContainer, RuntimeError,
    LABEL_BRANCH, LABEL_MANAGED, LABEL_REPO,
};
use crate::git::template::worktree_dir_name;
use crate::git::{GitError, WorktreeManager};
use crate::tmux::{AttachOutcome, MuxError, Multiplexer, SessionCommand};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub running: bool,
    pub exit_code: Option<i64>,
    /// Incremented on every start; tmux panes die with the previous boot.
    pub boots: u32,
}

/// Container engine that keeps containers in a map.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicU32,
    fail_create: Mutex<Option<String>>,
    fail_start: Mutex<Option<String>>,
    unavailable: Mutex<bool>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        locked(&self.containers).get(id).cloned()
    }

    pub fn count(&self) -> usize {
        locked(&self.containers).len()
    }

    pub fn ids(&self) -> Vec<String> {
        locked(&self.containers).keys().cloned().collect()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.container(id).map(|c| c.running).unwrap_or(false)
    }

    pub fn boots(&self, id: &str) -> u32 {
        self.container(id).map(|c| c.boots).unwrap_or(0)
    }

    /// The container's main process exited on its own.
    pub fn simulate_exit(&self, id: &str, code: i64) {
        if let Some(c) = locked(&self.containers).get_mut(id) {
            c.running = false;
            c.exit_code = Some(code);
        }
    }

    /// Someone ran `docker rm -f` behind our back.
    pub fn simulate_removal(&self, id: &str) {
        locked(&self.containers).remove(id);
    }

    /// Someone ran `docker start` behind our back.
    pub fn simulate_start(&self, id: &str) {
        if let Some(c) = locked(&self.containers).get_mut(id) {
            c.running = true;
            c.boots += 1;
        }
    }

    /// A labelled container no catalog entry knows about.
    pub fn add_orphan(&self, branch: &str, running: bool) -> String {
        self.add_orphan_in("", branch, running)
    }

    /// Like [`FakeRuntime::add_orphan`], labelled with a repository.
    pub fn add_orphan_in(&self, repo: &str, branch: &str, running: bool) -> String {
        let spec = ContainerSpec {
            name: crate::containers::generate_name(branch),
            labels: vec![
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_BRANCH.to_string(), branch.to_string()),
                (LABEL_REPO.to_string(), repo.to_string()),
            ],
            ..Default::default()
        };
        let id = self.next_container_id();
        locked(&self.containers).insert(
            id.clone(),
            FakeContainer {
                spec,
                running,
                exit_code: None,
                boots: u32::from(running),
            },
        );
        id
    }

    pub fn fail_next_create(&self, message: &str) {
        *locked(&self.fail_create) = Some(message.to_string());
    }

    pub fn fail_next_start(&self, message: &str) {
        *locked(&self.fail_start) = Some(message.to_string());
    }

    /// Every probe fails as if the daemon were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *locked(&self.unavailable) = unavailable;
    }

    fn check_available(&self) -> Result<(), RuntimeError> {
        if *locked(&self.unavailable) {
            return Err(RuntimeError::DaemonNotRunning);
        }
        Ok(())
    }

    fn next_container_id(&self) -> String {
        format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> Result<T, RuntimeError> {
        self.check_available()?;
        locked(&self.containers)
            .get_mut(id)
            .map(f)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

impl ContainerRuntimeInterface for FakeRuntime {
    fn is_available(&self) -> bool {
        !*locked(&self.unavailable)
    }

    fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.check_available()?;
        if let Some(message) = locked(&self.fail_create).take() {
            return Err(RuntimeError::engine("create", message));
        }
        let mut containers = locked(&self.containers);
        if containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::AlreadyExists(spec.name.clone()));
        }
        let id = self.next_container_id();
        containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
                exit_code: None,
                boots: 0,
            },
        );
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        if let Some(message) = locked(&self.fail_start).take() {
            return Err(RuntimeError::engine("start", message));
        }
        self.with_container(id, |c| {
            if !c.running {
                c.running = true;
                c.exit_code = None;
                c.boots += 1;
            }
        })
    }

    fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.with_container(id, |c| {
            c.running = false;
            c.exit_code = Some(0);
        })
    }

    fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_container(id, |c| {
            if c.running {
                c.running = false;
                c.exit_code = Some(137);
            }
        })
    }

    fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.check_available()?;
        let mut containers = locked(&self.containers);
        match containers.get(id) {
            None => Err(RuntimeError::NotFound(id.to_string())),
            Some(c) if c.running && !force => Err(RuntimeError::engine(
                "remove",
                "container is running",
            )),
            Some(_) => {
                containers.remove(id);
                Ok(())
            }
        }
    }

    fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        self.with_container(id, |c| ContainerState {
            running: c.running,
            exit_code: c.exit_code,
        })
    }

    fn exec(&self, id: &str, _cmd: &[&str]) -> Result<Output, RuntimeError> {
        self.with_container(id, |_| ())?;
        Err(RuntimeError::engine(
            "exec",
            "not supported by the fake runtime",
        ))
    }

    fn logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError> {
        self.with_container(id, |c| {
            format!("{} started from {} (tail {})", c.spec.name, c.spec.image, tail)
        })
    }

    fn list_managed(&self) -> Result<Vec<ManagedContainer>, RuntimeError> {
        self.check_available()?;
        Ok(locked(&self.containers)
            .iter()
            .map(|(id, c)| {
                let label = |key: &str| {
                    c.spec
                        .labels
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };
                ManagedContainer {
                    id: id.clone(),
                    name: c.spec.name.clone(),
                    branch: label(LABEL_BRANCH),
                    repo: label(LABEL_REPO),
                }
            })
            .collect())
    }

    fn exec_command(&self, id: &str) -> Vec<String> {
        vec!["fake".to_string(), "exec".to_string(), id.to_string()]
    }
}

/// Worktrees as plain directories under a scratch root.
pub struct FakeWorktrees {
    root: PathBuf,
    worktrees: Mutex<HashMap<PathBuf, String>>,
    dirty: Mutex<HashSet<PathBuf>>,
    created: AtomicU32,
}

impl FakeWorktrees {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            worktrees: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            created: AtomicU32::new(0),
        }
    }

    pub fn mark_dirty(&self, path: &Path) {
        locked(&self.dirty).insert(path.to_path_buf());
    }

    /// Delete the directory without telling anyone.
    pub fn delete_on_disk(&self, path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    pub fn count(&self) -> usize {
        locked(&self.worktrees).len()
    }

    /// Total successful `create` calls.
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

impl WorktreeManager for FakeWorktrees {
    fn path_for(&self, branch: &str) -> Result<PathBuf, GitError> {
        Ok(self.root.join(worktree_dir_name(branch)))
    }

    fn create(&self, branch: &str) -> Result<PathBuf, GitError> {
        let path = self.path_for(branch)?;
        let mut worktrees = locked(&self.worktrees);
        if path.exists() {
            return Err(GitError::WorktreeExists {
                branch: branch.to_string(),
                path,
            });
        }
        std::fs::create_dir_all(&path)?;
        worktrees.insert(path.clone(), branch.to_string());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }

    fn remove(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let mut worktrees = locked(&self.worktrees);
        if !path.exists() {
            worktrees.remove(path);
            return Ok(());
        }
        if !force && locked(&self.dirty).contains(path) {
            return Err(GitError::WorktreeDirty(path.to_path_buf()));
        }
        std::fs::remove_dir_all(path)?;
        worktrees.remove(path);
        locked(&self.dirty).remove(path);
        Ok(())
    }

    fn is_dirty(&self, path: &Path) -> Result<bool, GitError> {
        Ok(locked(&self.dirty).contains(path))
    }
}

#[derive(Debug, Clone)]
pub struct FakePane {
    pub id: String,
    pub boot: u32,
    pub command: SessionCommand,
}

/// tmux stand-in whose panes live as long as the fake container's boot.
pub struct FakeMultiplexer {
    runtime: Arc<FakeRuntime>,
    panes: Mutex<HashMap<String, Vec<FakePane>>>,
    next_pane: AtomicU32,
    attach_outcome: Mutex<AttachOutcome>,
    attached: Mutex<Vec<(String, String)>>,
}

impl FakeMultiplexer {
    pub fn new(runtime: Arc<FakeRuntime>) -> Self {
        Self {
            runtime,
            panes: Mutex::new(HashMap::new()),
            next_pane: AtomicU32::new(0),
            attach_outcome: Mutex::new(AttachOutcome::Detached),
            attached: Mutex::new(Vec::new()),
        }
    }

    fn live(&self, container_id: &str) -> Vec<FakePane> {
        if !self.runtime.is_running(container_id) {
            return Vec::new();
        }
        let boot = self.runtime.boots(container_id);
        locked(&self.panes)
            .get(container_id)
            .map(|panes| panes.iter().filter(|p| p.boot == boot).cloned().collect())
            .unwrap_or_default()
    }

    pub fn panes(&self, container_id: &str) -> Vec<FakePane> {
        self.live(container_id)
    }

    /// The pane's process exited.
    pub fn exit_pane(&self, container_id: &str, session_id: &str) {
        if let Some(panes) = locked(&self.panes).get_mut(container_id) {
            panes.retain(|p| p.id != session_id);
        }
    }

    pub fn set_attach_outcome(&self, outcome: AttachOutcome) {
        *locked(&self.attach_outcome) = outcome;
    }

    /// `(container, session)` pairs in attach order.
    pub fn attached(&self) -> Vec<(String, String)> {
        locked(&self.attached).clone()
    }
}

impl Multiplexer for FakeMultiplexer {
    fn new_session(&self, container_id: &str, command: &SessionCommand) -> Result<String, MuxError> {
        if !self.runtime.is_running(container_id) {
            return Err(MuxError::Runtime(RuntimeError::engine(
                "exec",
                format!("container {} is not running", container_id),
            )));
        }
        let id = format!("%{}", self.next_pane.fetch_add(1, Ordering::SeqCst));
        let pane = FakePane {
            id: id.clone(),
            boot: self.runtime.boots(container_id),
            command: command.clone(),
        };
        locked(&self.panes)
            .entry(container_id.to_string())
            .or_default()
            .push(pane);
        Ok(id)
    }

    fn attach(
        &self,
        container_id: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<AttachOutcome, MuxError>> {
        let alive = self.live(container_id).iter().any(|p| p.id == session_id);
        locked(&self.attached).push((container_id.to_string(), session_id.to_string()));
        let outcome = *locked(&self.attach_outcome);
        let session_id = session_id.to_string();

        Box::pin(async move {
            if !alive {
                return Err(MuxError::PaneNotFound(session_id));
            }
            if cancel.is_cancelled() {
                return Ok(AttachOutcome::Cancelled);
            }
            Ok(outcome)
        })
    }

    fn list_sessions(&self, container_id: &str) -> Result<Vec<String>, MuxError> {
        Ok(self.live(container_id).into_iter().map(|p| p.id).collect())
    }

    fn kill_session(&self, container_id: &str, session_id: &str) -> Result<(), MuxError> {
        self.exit_pane(container_id, session_id);
        Ok(())
    }

    fn capture(&self, container_id: &str, session_id: &str, lines: usize) -> Result<String, MuxError> {
        self.live(container_id)
            .into_iter()
            .find(|p| p.id == session_id)
            .map(|p| format!("{} | {} (last {} lines)", p.id, p.command.command, lines))
            .ok_or_else(|| MuxError::PaneNotFound(session_id.to_string()))
    }
}
