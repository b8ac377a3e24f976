use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container engine `{0}` was not found in PATH (set runtime.engine to docker or podman)")]
    NotInstalled(String),

    #[error("Container engine is installed but its daemon is not reachable")]
    DaemonNotRunning,

    #[error("Not allowed to talk to the container engine socket (check your docker group membership)")]
    PermissionDenied,

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("A container named {0} already exists")]
    AlreadyExists(String),

    #[error("Image {0} is not available locally or in its registry")]
    ImageNotFound(String),

    /// The engine rejected `action` for a reason not covered above.
    #[error("Container {action} failed: {message}")]
    Engine {
        action: &'static str,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn engine(action: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Engine {
            action,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
