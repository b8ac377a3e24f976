use std::process::Output;
use std::time::Duration;

use super::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    /// Parse a `host:container[:ro]` mount string.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.splitn(3, ':');
        let host_path = parts.next().filter(|s| !s.is_empty())?.to_string();
        let container_path = parts.next().filter(|s| !s.is_empty())?.to_string();
        let read_only = match parts.next() {
            None => false,
            Some("ro") => true,
            Some("rw") => false,
            Some(_) => return None,
        };
        Some(Self {
            host_path,
            container_path,
            read_only,
        })
    }
}

/// Everything needed to create one instance container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    pub volumes: Vec<VolumeMount>,
    /// Passed by name on the command line and by value through the engine
    /// process environment, so secrets never show up in `ps`.
    pub environment: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// A container carrying the managed label, as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub branch: String,
    pub repo: String,
}

pub trait ContainerRuntimeInterface: Send + Sync {
    fn is_available(&self) -> bool;

    fn create(&self, spec: &ContainerSpec) -> Result<String>;

    fn start(&self, id: &str) -> Result<()>;

    /// Graceful stop bounded by `timeout`; escalates to kill if the container
    /// is still running afterwards.
    fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    fn kill(&self, id: &str) -> Result<()>;

    fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Fails with `RuntimeError::NotFound` for unknown ids.
    fn inspect(&self, id: &str) -> Result<ContainerState>;

    fn exec(&self, id: &str, cmd: &[&str]) -> Result<Output>;

    fn logs(&self, id: &str, tail: usize) -> Result<String>;

    fn list_managed(&self) -> Result<Vec<ManagedContainer>>;

    /// Command prefix for an interactive exec into the container.
    fn exec_command(&self, id: &str) -> Vec<String>;
}
