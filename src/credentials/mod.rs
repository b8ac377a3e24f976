//! Credential gateway: per-agent secrets kept in the host's secure store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::agents::Agent;

pub mod keychain;

pub use keychain::KeychainStore;

/// Service name every secret is filed under.
pub const SERVICE: &str = "arbor";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credential stored for {0}. Run `arbor auth {0}` first")]
    NotAuthenticated(Agent),

    #[error("Secure store error: {0}")]
    Keyring(#[from] keyring::Error),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Secret material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

pub trait CredentialStore: Send + Sync {
    fn store(&self, agent: Agent, credential: &Credential) -> Result<()>;

    /// Fails with [`CredentialError::NotAuthenticated`] when nothing is stored.
    fn fetch(&self, agent: Agent) -> Result<Credential>;

    /// Succeeds when nothing is stored.
    fn clear(&self, agent: Agent) -> Result<()>;

    fn is_authenticated(&self, agent: Agent) -> Result<bool> {
        match self.fetch(agent) {
            Ok(_) => Ok(true),
            Err(CredentialError::NotAuthenticated(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Process-local store for tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<Agent, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(agent: Agent, secret: &str) -> Self {
        let store = Self::new();
        store.secrets().insert(agent, Credential::new(secret));
        store
    }

    fn secrets(&self) -> std::sync::MutexGuard<'_, HashMap<Agent, Credential>> {
        self.secrets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, agent: Agent, credential: &Credential) -> Result<()> {
        self.secrets().insert(agent, credential.clone());
        Ok(())
    }

    fn fetch(&self, agent: Agent) -> Result<Credential> {
        self.secrets()
            .get(&agent)
            .cloned()
            .ok_or(CredentialError::NotAuthenticated(agent))
    }

    fn clear(&self, agent: Agent) -> Result<()> {
        self.secrets().remove(&agent);
        Ok(())
    }
}
