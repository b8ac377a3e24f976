//! Lifecycle orchestrator: the instance state machine.
//!
//! Every command first reconciles the catalog against the live runtime (see
//! [`reconcile`]), then drives worktrees, containers, credentials and tmux,
//! persisting each durable state change as soon as it happens:
//!
//! ```text
//!   (none) --run--> Creating --container created--> Stopped --start--> Running
//!   Running --stop/kill--> Stopped --run--> Running
//!   Running --drift--> Crashed --run (restartable)--> Running
//!   any --rm--> Removing --> (none)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::Agent;
use crate::catalog::Catalog;
use crate::config::{Config, SandboxConfig};
use crate::containers::{
    self, ContainerRuntimeInterface, ContainerSpec, RuntimeError, VolumeMount, CONTAINER_WORKDIR,
    LABEL_BRANCH, LABEL_MANAGED, LABEL_REPO,
};
use crate::credentials::{Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::git::WorktreeManager;
use crate::instance::environment::{
    build_agent_command, container_environment, session_environment,
};
use crate::instance::{CrashCause, Instance, InstanceState, Session, SessionMode};
use crate::tmux::{AttachOutcome, MuxError, Multiplexer, SessionCommand};

pub mod reconcile;


pub use reconcile::{Orphan, OrphanAction};

const RECREATE_HINT: &str = "use `arbor recreate` to rebuild it";

/// Knobs the orchestrator takes from configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Value of the repository label on every container; only containers
    /// carrying the same value are considered for adoption or removal.
    pub repo: String,
    pub image: String,
    pub stop_timeout: Duration,
    pub sandbox: SandboxConfig,
    pub yolo_mode: bool,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            repo: String::new(),
            image: config.runtime.image.clone(),
            stop_timeout: config.stop_timeout(),
            sandbox: config.sandbox.clone(),
            yolo_mode: config.session.yolo_mode,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub branch: String,
    /// `None` starts a plain shell.
    pub agent: Option<Agent>,
    pub prompt: Option<String>,
    pub detached: bool,
}

/// A session that is running, before any attach.
#[derive(Debug, Clone)]
pub struct Started {
    pub instance: Instance,
    pub session: Session,
    /// The instance did not exist before this call.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub started: Started,
    /// `None` for detached runs.
    pub attach: Option<AttachOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PsReport {
    pub instances: Vec<Instance>,
    pub orphans: Vec<Orphan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaneCapture {
    pub session: Session,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsReport {
    pub instance: Instance,
    pub container_logs: Option<String>,
    pub panes: Vec<PaneCapture>,
}

pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    runtime: Arc<dyn ContainerRuntimeInterface>,
    worktrees: Arc<dyn WorktreeManager>,
    mux: Arc<dyn Multiplexer>,
    credentials: Arc<dyn CredentialStore>,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        runtime: Arc<dyn ContainerRuntimeInterface>,
        worktrees: Arc<dyn WorktreeManager>,
        mux: Arc<dyn Multiplexer>,
        credentials: Arc<dyn CredentialStore>,
        settings: Settings,
    ) -> Self {
        Self {
            catalog,
            runtime,
            worktrees,
            mux,
            credentials,
            settings,
        }
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    fn fetch_credential(&self, agent: Option<Agent>) -> Result<Option<(Agent, Credential)>> {
        agent
            .map(|a| Ok((a, self.credentials.fetch(a)?)))
            .transpose()
    }

    /// Create or restart the instance for `req.branch` and start a new session
    /// in it. Does not attach.
    pub fn start(&self, req: &RunRequest) -> Result<Started> {
        let branch = req.branch.as_str();
        self.reconciled(Some(branch), || {
            // Surfaces NotAuthenticated before anything is created.
            let credential = self.fetch_credential(req.agent)?;

            let (instance, created) = {
                let _lock = self.catalog.lock(branch)?;
                self.ensure_running(branch, credential.as_ref())?
            };

            let mode = if req.detached {
                SessionMode::Detached
            } else {
                SessionMode::Attached
            };
            let session = self.spawn_session(
                &instance,
                req.agent,
                req.prompt.as_deref(),
                credential.as_ref(),
                mode,
            )?;

            let _lock = self.catalog.lock(branch)?;
            let mut fresh = self.catalog.get(branch)?;
            if fresh.state != InstanceState::Running || fresh.container_id != instance.container_id
            {
                // The instance changed while the pane was starting.
                if let Err(e) = self.mux.kill_session(&instance.container_id, &session.id) {
                    warn!("Failed to clean up pane {}: {}", session.id, e);
                }
                return Err(Error::mismatch(branch, fresh.state, "add a session to"));
            }
            fresh.add_session(session.clone());
            self.catalog.put(&fresh)?;
            info!(
                "Started {} session {} in '{}'",
                session.label(),
                session.id,
                branch
            );

            Ok(Started {
                instance: fresh,
                session,
                created,
            })
        })
    }

    /// [`Orchestrator::start`], then attach to the new session unless detached.
    pub async fn run(&self, req: &RunRequest, cancel: CancellationToken) -> Result<RunOutcome> {
        let started = self.start(req)?;
        self.attach_started(req, started, cancel).await
    }

    async fn attach_started(
        &self,
        req: &RunRequest,
        started: Started,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        if req.detached {
            return Ok(RunOutcome {
                started,
                attach: None,
            });
        }

        let outcome = self
            .mux
            .attach(&started.instance.container_id, &started.session.id, cancel)
            .await?;
        Ok(RunOutcome {
            started,
            attach: Some(outcome),
        })
    }

    /// Attach to `session_id`, or to the most recent session.
    pub async fn attach(
        &self,
        branch: &str,
        session_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<AttachOutcome> {
        let (container_id, session_id) = self.reconciled(Some(branch), || {
            let instance = self.catalog.get(branch)?;
            if instance.state != InstanceState::Running {
                return Err(Error::mismatch(branch, instance.state, "attach to"));
            }
            let session = match session_id {
                Some(id) => instance.find_session(id).ok_or_else(|| {
                    Error::NotFound(format!("Session {} not found in '{}'", id, branch))
                })?,
                None => instance
                    .latest_session()
                    .ok_or_else(|| Error::NoSessions(branch.to_string()))?,
            };
            Ok((instance.container_id.clone(), session.id.clone()))
        })?;

        Ok(self.mux.attach(&container_id, &session_id, cancel).await?)
    }

    pub fn stop(&self, branch: &str) -> Result<Instance> {
        self.reconciled(Some(branch), || {
            let _lock = self.catalog.lock(branch)?;
            let mut instance = self.catalog.get(branch)?;

            match instance.state {
                InstanceState::Running => {
                    match self
                        .runtime
                        .stop(&instance.container_id, self.settings.stop_timeout)
                    {
                        Ok(()) => instance.mark_stopped(),
                        Err(RuntimeError::NotFound(_)) => {
                            warn!("Container for '{}' vanished before stop", branch);
                            instance.mark_crashed(CrashCause::ContainerMissing);
                        }
                        Err(e) => return Err(e.into()),
                    }
                    self.catalog.put(&instance)?;
                    info!("Stopped '{}'", branch);
                    Ok(instance)
                }
                InstanceState::Stopped | InstanceState::Crashed => Ok(instance),
                InstanceState::Creating | InstanceState::Removing => {
                    Err(Error::mismatch(branch, instance.state, "stop"))
                }
            }
        })
    }

    pub fn kill(&self, branch: &str) -> Result<Instance> {
        self.reconciled(Some(branch), || {
            let _lock = self.catalog.lock(branch)?;
            let mut instance = self.catalog.get(branch)?;

            if !instance.has_container() {
                return Err(Error::mismatch(branch, instance.state, "kill"));
            }

            match self.runtime.kill(&instance.container_id) {
                Ok(()) => instance.mark_stopped(),
                Err(RuntimeError::NotFound(_)) => {
                    instance.mark_crashed(CrashCause::ContainerMissing)
                }
                Err(e) => return Err(e.into()),
            }
            self.catalog.put(&instance)?;
            info!("Killed '{}' ({})", branch, instance.state);
            Ok(instance)
        })
    }

    /// Tear down container, worktree and entry. Without `force` a running
    /// instance or a dirty worktree is refused before anything is touched.
    pub fn rm(&self, branch: &str, force: bool) -> Result<()> {
        self.reconciled(Some(branch), || {
            let _lock = self.catalog.lock(branch)?;
            let mut instance = self.catalog.get(branch)?;

            if instance.state == InstanceState::Running && !force {
                return Err(Error::mismatch_hint(
                    branch,
                    instance.state,
                    "remove",
                    "stop it first or pass --force",
                ));
            }

            let path = instance.worktree_path.clone();
            if !force && self.worktrees.exists(&path) && self.worktrees.is_dirty(&path)? {
                return Err(Error::Dirty(path));
            }

            if instance.has_container() {
                match self.runtime.remove(&instance.container_id, true) {
                    Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            instance.mark_removing();
            self.catalog.put(&instance)?;

            self.worktrees.remove(&path, force)?;
            self.catalog.delete(branch)?;
            info!("Removed '{}'", branch);
            Ok(())
        })
    }

    /// Force-remove the instance and run it again from scratch. The agent
    /// defaults to the one the most recent session ran.
    pub async fn recreate(&self, req: &RunRequest, cancel: CancellationToken) -> Result<RunOutcome> {
        let previous = self
            .catalog
            .find(&req.branch)?
            .ok_or_else(|| Error::instance_not_found(&req.branch))?;

        let req = RunRequest {
            agent: req.agent.or_else(|| previous.last_agent()),
            ..req.clone()
        };

        // Refuse before destroying anything we could not bring back.
        self.fetch_credential(req.agent)?;

        self.rm(&req.branch, true)?;
        let started = match self.start(&req) {
            Ok(started) => started,
            Err(e) => {
                // No half-built instance survives a failed recreate.
                if self.catalog.find(&req.branch)?.is_some() {
                    if let Err(cleanup) = self.rm(&req.branch, true) {
                        warn!("Failed to clean up '{}': {}", req.branch, cleanup);
                    }
                }
                return Err(e);
            }
        };
        self.attach_started(&req, started, cancel).await
    }

    pub fn ps(&self) -> Result<PsReport> {
        let orphans = self.sweep_orphans()?;
        let instances = self.reconcile_all()?;
        Ok(PsReport { instances, orphans })
    }

    pub fn logs(&self, branch: &str, lines: usize) -> Result<LogsReport> {
        self.reconciled(Some(branch), || {
            let instance = self.catalog.get(branch)?;

            let container_logs = if instance.has_container() {
                match self.runtime.logs(&instance.container_id, lines) {
                    Ok(text) => Some(text),
                    Err(RuntimeError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                }
            } else {
                None
            };

            let mut panes = Vec::new();
            if instance.state == InstanceState::Running {
                for session in &instance.sessions {
                    match self.mux.capture(&instance.container_id, &session.id, lines) {
                        Ok(output) => panes.push(PaneCapture {
                            session: session.clone(),
                            output,
                        }),
                        Err(MuxError::PaneNotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            Ok(LogsReport {
                instance,
                container_logs,
                panes,
            })
        })
    }

    /// Bring the branch's instance to Running, creating it if needed.
    /// Caller holds the branch lock.
    fn ensure_running(
        &self,
        branch: &str,
        credential: Option<&(Agent, Credential)>,
    ) -> Result<(Instance, bool)> {
        let Some(mut instance) = self.catalog.find(branch)? else {
            let path = self.worktrees.path_for(branch)?;
            let mut instance = Instance::new(branch, path, &self.settings.image);
            self.catalog.put(&instance)?;

            if let Err(e) = self.worktrees.create(branch) {
                if let Err(del) = self.catalog.delete(branch) {
                    warn!("Failed to drop entry for '{}': {}", branch, del);
                }
                return Err(e.into());
            }
            info!("Created worktree for '{}'", branch);

            self.provision(&mut instance, credential)?;
            return Ok((instance, true));
        };

        match instance.state {
            InstanceState::Running => {}
            InstanceState::Stopped | InstanceState::Crashed => {
                if let Some(cause) = instance.crash_cause.filter(|c| c.needs_recreate()) {
                    return Err(Error::mismatch_hint(
                        branch,
                        instance.state,
                        "run",
                        match cause {
                            CrashCause::WorktreeMissing => {
                                "its worktree is gone; use `arbor recreate`"
                            }
                            _ => RECREATE_HINT,
                        },
                    ));
                }
                match self.runtime.start(&instance.container_id) {
                    Ok(()) => {}
                    Err(RuntimeError::NotFound(_)) => {
                        instance.mark_crashed(CrashCause::ContainerMissing);
                        self.catalog.put(&instance)?;
                        return Err(Error::mismatch_hint(
                            branch,
                            instance.state,
                            "run",
                            RECREATE_HINT,
                        ));
                    }
                    Err(e) => return Err(e.into()),
                }
                instance.mark_running();
                self.catalog.put(&instance)?;
                info!("Restarted '{}'", branch);
            }
            InstanceState::Creating => {
                info!("Resuming interrupted creation of '{}'", branch);
                if !self.worktrees.exists(&instance.worktree_path) {
                    self.worktrees.create(branch)?;
                }
                instance.crash_cause = None;
                if !self.adopt_leftover(&mut instance)? {
                    self.provision(&mut instance, credential)?;
                }
            }
            InstanceState::Removing => {
                return Err(Error::mismatch_hint(
                    branch,
                    instance.state,
                    "run",
                    "finish with `arbor rm`",
                ));
            }
        }

        Ok((instance, false))
    }

    /// Reuse a container an interrupted run created before it could record
    /// the id. Further leftovers for the branch are removed. Returns whether
    /// the instance now runs in an adopted container.
    fn adopt_leftover(&self, instance: &mut Instance) -> Result<bool> {
        let leftovers: Vec<_> = self
            .runtime
            .list_managed()?
            .into_iter()
            .filter(|c| c.branch == instance.branch && c.repo == self.settings.repo)
            .collect();
        let Some((keep, extra)) = leftovers.split_first() else {
            return Ok(false);
        };

        for container in extra {
            match self.runtime.remove(&container.id, true) {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {
                    info!("Removed duplicate container {} for '{}'", container.id, instance.branch)
                }
                Err(e) => return Err(e.into()),
            }
        }

        instance.mark_created(&keep.id);
        self.catalog.put(instance)?;
        info!("Adopted container {} into '{}'", keep.id, instance.branch);

        self.runtime.start(&keep.id)?;
        instance.mark_running();
        self.catalog.put(instance)?;
        Ok(true)
    }

    /// Create and start the container for an instance whose worktree exists.
    fn provision(
        &self,
        instance: &mut Instance,
        credential: Option<&(Agent, Credential)>,
    ) -> Result<()> {
        let spec = self.container_spec(instance, credential);
        let id = self.runtime.create(&spec)?;
        instance.mark_created(&id);
        self.catalog.put(instance)?;

        self.runtime.start(&id)?;
        instance.mark_running();
        self.catalog.put(instance)?;
        info!("Instance '{}' running in {}", instance.branch, spec.name);
        Ok(())
    }

    pub(crate) fn container_spec(
        &self,
        instance: &Instance,
        credential: Option<&(Agent, Credential)>,
    ) -> ContainerSpec {
        let sandbox = &self.settings.sandbox;

        let mut volumes = vec![VolumeMount {
            host_path: instance.worktree_path.to_string_lossy().to_string(),
            container_path: CONTAINER_WORKDIR.to_string(),
            read_only: false,
        }];
        if let Some(git_dir) = self.worktrees.git_common_dir() {
            let git_dir = git_dir.to_string_lossy().to_string();
            volumes.push(VolumeMount {
                host_path: git_dir.clone(),
                container_path: git_dir,
                read_only: false,
            });
        }
        for raw in &sandbox.extra_volumes {
            match VolumeMount::parse(raw) {
                Some(mount) => volumes.push(mount),
                None => warn!("Ignoring malformed extra volume '{}'", raw),
            }
        }

        let credential_env =
            credential.map(|(agent, cred)| (agent.def().credential_env, cred.expose()));

        ContainerSpec {
            name: containers::generate_name(&instance.branch),
            image: instance.image.clone(),
            working_dir: CONTAINER_WORKDIR.to_string(),
            volumes,
            environment: container_environment(sandbox, credential_env),
            labels: vec![
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_BRANCH.to_string(), instance.branch.clone()),
                (LABEL_REPO.to_string(), self.settings.repo.clone()),
            ],
            cpu_limit: sandbox.cpu_limit.clone(),
            memory_limit: sandbox.memory_limit.clone(),
        }
    }

    fn spawn_session(
        &self,
        instance: &Instance,
        agent: Option<Agent>,
        prompt: Option<&str>,
        credential: Option<&(Agent, Credential)>,
        mode: SessionMode,
    ) -> Result<Session> {
        let credential_env = credential.map(|(a, cred)| (a.def().credential_env, cred.expose()));
        let command = SessionCommand {
            command: build_agent_command(agent, prompt, self.settings.yolo_mode),
            env: session_environment(credential_env),
            working_dir: CONTAINER_WORKDIR.to_string(),
        };
        let id = self.mux.new_session(&instance.container_id, &command)?;
        Ok(Session::new(id, agent, mode))
    }

    pub fn worktree_path(&self, branch: &str) -> Result<PathBuf> {
        Ok(self.worktrees.path_for(branch)?)
    }
}
