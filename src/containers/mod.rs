pub mod container_interface;
pub mod docker;
pub mod error;

pub use container_interface::{
    ContainerRuntimeInterface, ContainerSpec, ContainerState, ManagedContainer, VolumeMount,
};
pub use error::{Result, RuntimeError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed in-container path the worktree is mounted at.
pub const CONTAINER_WORKDIR: &str = "/workspace";

pub const LABEL_MANAGED: &str = "arbor.managed";
pub const LABEL_BRANCH: &str = "arbor.branch";
/// Repository the instance belongs to; branch names repeat across repositories.
pub const LABEL_REPO: &str = "arbor.repo";

const NAME_PREFIX: &str = "arbor-";
const NAME_BRANCH_MAX: usize = 40;

/// Docker-compatible engine CLI to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Docker,
    Podman,
}

impl Engine {
    pub fn binary(self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Podman => "podman",
        }
    }
}

pub fn default_container_runtime(engine: Engine) -> docker::Docker {
    docker::Docker::new(engine)
}

/// Container names carry the branch for humans plus a random suffix, so a
/// recreated instance never reuses the previous container's name.
pub fn generate_name(branch: &str) -> String {
    let safe: String = branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(NAME_BRANCH_MAX)
        .collect();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{}{}-{}", NAME_PREFIX, safe.trim_matches('-'), suffix)
}
