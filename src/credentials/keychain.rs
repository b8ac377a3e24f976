//! Host secure store through the `keyring` crate: Keychain on macOS,
//! Credential Manager on Windows, Secret Service elsewhere.

use keyring::Entry;

use super::{Credential, CredentialError, CredentialStore, Result, SERVICE};
use crate::agents::Agent;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeychainStore;

impl KeychainStore {
    pub fn new() -> Self {
        Self
    }

    /// One entry per agent, filed under [`SERVICE`] with the agent name as user.
    fn entry(agent: Agent) -> Result<Entry> {
        Ok(Entry::new(SERVICE, agent.name())?)
    }
}

/// `NoEntry` means nothing is stored for the agent.
fn map_fetch_error(agent: Agent, err: keyring::Error) -> CredentialError {
    match err {
        keyring::Error::NoEntry => CredentialError::NotAuthenticated(agent),
        other => CredentialError::Keyring(other),
    }
}

impl CredentialStore for KeychainStore {
    fn store(&self, agent: Agent, credential: &Credential) -> Result<()> {
        Self::entry(agent)?.set_password(credential.expose())?;
        tracing::info!("Stored credential for {}", agent);
        Ok(())
    }

    fn fetch(&self, agent: Agent) -> Result<Credential> {
        let secret = Self::entry(agent)?
            .get_password()
            .map_err(|e| map_fetch_error(agent, e))?;
        if secret.trim().is_empty() {
            return Err(CredentialError::NotAuthenticated(agent));
        }
        tracing::debug!("Loaded credential for {}", agent);
        Ok(Credential::new(secret.trim()))
    }

    fn clear(&self, agent: Agent) -> Result<()> {
        match Self::entry(agent)?.delete_credential() {
            Ok(()) => tracing::info!("Cleared credential for {}", agent),
            Err(keyring::Error::NoEntry) => tracing::debug!("No credential to clear for {}", agent),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
