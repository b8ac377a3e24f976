//! Instance and session definitions

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::Agent;

pub mod environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Creating,
    Running,
    Stopped,
    Crashed,
    Removing,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Creating => "creating",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Crashed => "crashed",
            InstanceState::Removing => "removing",
        }
    }

    /// States in which the instance owns a container.
    pub fn has_container(self) -> bool {
        matches!(
            self,
            InstanceState::Running | InstanceState::Stopped | InstanceState::Crashed
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the reconciler moved an instance to [`InstanceState::Crashed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrashCause {
    ContainerMissing,
    ContainerExited { exit_code: Option<i64> },
    WorktreeMissing,
}

impl CrashCause {
    /// Causes that a plain restart cannot repair.
    pub fn needs_recreate(self) -> bool {
        matches!(self, CrashCause::ContainerMissing | CrashCause::WorktreeMissing)
    }
}

impl fmt::Display for CrashCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashCause::ContainerMissing => f.write_str("container missing"),
            CrashCause::ContainerExited {
                exit_code: Some(code),
            } => write!(f, "container exited ({})", code),
            CrashCause::ContainerExited { exit_code: None } => f.write_str("container exited"),
            CrashCause::WorktreeMissing => f.write_str("worktree missing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Attached,
    Detached,
}

/// One tmux pane inside an instance's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Pane id as reported by tmux, e.g. `%3`.
    pub id: String,
    /// `None` for a plain shell.
    #[serde(default)]
    pub agent: Option<Agent>,
    pub mode: SessionMode,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, agent: Option<Agent>, mode: SessionMode) -> Self {
        Self {
            id: id.into(),
            agent,
            mode,
            started_at: Utc::now(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.agent.map(Agent::name).unwrap_or("shell")
    }
}

/// One branch bound to a worktree and a container. Serialized as-is into the
/// catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub branch: String,
    pub worktree_path: PathBuf,
    /// Empty until the container exists.
    #[serde(default)]
    pub container_id: String,
    pub state: InstanceState,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_cause: Option<CrashCause>,
}

impl Instance {
    pub fn new(branch: &str, worktree_path: PathBuf, image: &str) -> Self {
        let now = Utc::now();
        Self {
            branch: branch.to_string(),
            worktree_path,
            container_id: String::new(),
            state: InstanceState::Creating,
            created_at: now,
            last_seen_at: now,
            sessions: Vec::new(),
            image: image.to_string(),
            crash_cause: None,
        }
    }

    pub fn has_container(&self) -> bool {
        !self.container_id.is_empty()
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }

    /// The container now exists but is not running yet.
    pub fn mark_created(&mut self, container_id: &str) {
        self.container_id = container_id.to_string();
        self.state = InstanceState::Stopped;
        self.touch();
    }

    pub fn mark_running(&mut self) {
        self.state = InstanceState::Running;
        self.crash_cause = None;
        self.touch();
    }

    /// Sessions never outlive a stopped container.
    pub fn mark_stopped(&mut self) {
        self.state = InstanceState::Stopped;
        self.crash_cause = None;
        self.sessions.clear();
        self.touch();
    }

    pub fn mark_crashed(&mut self, cause: CrashCause) {
        self.state = InstanceState::Crashed;
        self.crash_cause = Some(cause);
        self.sessions.clear();
    }

    pub fn mark_removing(&mut self) {
        self.state = InstanceState::Removing;
        self.container_id.clear();
        self.sessions.clear();
        self.touch();
    }

    pub fn latest_session(&self) -> Option<&Session> {
        self.sessions.last()
    }

    pub fn find_session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Agent of the most recent session that ran one.
    pub fn last_agent(&self) -> Option<Agent> {
        self.sessions.iter().rev().find_map(|s| s.agent)
    }

    /// Append a session, replacing a stale record with the same pane id.
    pub fn add_session(&mut self, session: Session) {
        self.sessions.retain(|s| s.id != session.id);
        self.sessions.push(session);
        self.touch();
    }

    /// Keep only sessions whose pane is still alive. Returns whether any were dropped.
    pub fn retain_live_sessions(&mut self, live: &[String]) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| live.contains(&s.id));
        self.sessions.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new("feat/auth", PathBuf::from("/wt/feat-auth"), "img:1")
    }

    #[test]
    fn test_new_instance_is_creating_without_container() {
        let inst = instance();
        assert_eq!(inst.state, InstanceState::Creating);
        assert!(!inst.has_container());
        assert!(inst.sessions.is_empty());
    }

    #[test]
    fn test_state_transitions_keep_container_invariant() {
        let mut inst = instance();
        inst.mark_created("abc123");
        assert_eq!(inst.state, InstanceState::Stopped);
        assert!(inst.has_container() && inst.state.has_container());

        inst.mark_running();
        inst.add_session(Session::new("%1", Some(Agent::Claude), SessionMode::Attached));
        inst.mark_crashed(CrashCause::ContainerExited { exit_code: Some(137) });
        assert!(inst.sessions.is_empty());
        assert!(inst.has_container() && inst.state.has_container());

        inst.mark_running();
        assert_eq!(inst.crash_cause, None);

        inst.mark_removing();
        assert!(!inst.has_container() && !inst.state.has_container());
    }

    #[test]
    fn test_add_session_keeps_ids_unique() {
        let mut inst = instance();
        inst.add_session(Session::new("%1", Some(Agent::Claude), SessionMode::Attached));
        inst.add_session(Session::new("%2", None, SessionMode::Detached));
        inst.add_session(Session::new("%1", Some(Agent::Codex), SessionMode::Detached));

        let ids: Vec<_> = inst.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["%2", "%1"]);
        assert_eq!(inst.latest_session().unwrap().agent, Some(Agent::Codex));
    }

    #[test]
    fn test_last_agent_skips_shell_sessions() {
        let mut inst = instance();
        inst.add_session(Session::new("%1", Some(Agent::Gemini), SessionMode::Attached));
        inst.add_session(Session::new("%2", None, SessionMode::Attached));
        assert_eq!(inst.last_agent(), Some(Agent::Gemini));
    }

    #[test]
    fn test_retain_live_sessions() {
        let mut inst = instance();
        inst.add_session(Session::new("%1", None, SessionMode::Attached));
        inst.add_session(Session::new("%2", None, SessionMode::Attached));

        assert!(inst.retain_live_sessions(&["%2".to_string()]));
        assert_eq!(inst.sessions.len(), 1);
        assert!(!inst.retain_live_sessions(&["%2".to_string()]));
    }

    #[test]
    fn test_serde_shape() {
        let mut inst = instance();
        inst.mark_created("abc");
        inst.mark_crashed(CrashCause::ContainerExited { exit_code: Some(1) });
        let json = serde_json::to_value(&inst).unwrap();

        assert_eq!(json["state"], "crashed");
        assert_eq!(json["crash_cause"]["kind"], "container_exited");
        assert_eq!(json["crash_cause"]["exit_code"], 1);

        let back: Instance = serde_json::from_value(json).unwrap();
        assert_eq!(back, inst);
    }

    #[test]
    fn test_deserialize_tolerates_missing_optional_fields() {
        let json = r#"{
            "branch": "main",
            "worktree_path": "/wt/main",
            "state": "creating",
            "created_at": "2026-01-01T00:00:00Z",
            "last_seen_at": "2026-01-01T00:00:00Z"
        }"#;
        let inst: Instance = serde_json::from_str(json).unwrap();
        assert!(inst.container_id.is_empty());
        assert!(inst.sessions.is_empty());
        assert_eq!(inst.crash_cause, None);
    }

    #[test]
    fn test_crash_cause_display() {
        assert_eq!(
            CrashCause::ContainerExited { exit_code: Some(2) }.to_string(),
            "container exited (2)"
        );
        assert!(CrashCause::WorktreeMissing.needs_recreate());
        assert!(!CrashCause::ContainerExited { exit_code: None }.needs_recreate());
    }
}
