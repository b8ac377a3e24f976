//! `arbor auth` command implementation

use std::io::{BufRead, IsTerminal, Write};

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::agents::Agent;
use crate::credentials::{Credential, CredentialStore, KeychainStore};

#[derive(Debug, Args)]
pub struct AuthArgs {
    /// Agent whose credential to manage
    #[arg(value_enum, ignore_case = true)]
    pub agent: Agent,

    /// Delete the stored credential
    #[arg(long)]
    pub clear: bool,

    /// Report whether a credential is stored
    #[arg(long, conflicts_with = "clear")]
    pub status: bool,
}

fn read_secret(agent: Agent) -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("{} for {}: ", agent.def().credential_env, agent);
        std::io::stderr().flush()?;
    }

    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("Failed to read credential from stdin")?;
    let secret = line.trim().to_string();
    if secret.is_empty() {
        bail!("No credential given for {}", agent);
    }
    Ok(secret)
}

pub async fn run(args: AuthArgs) -> Result<()> {
    run_with(&KeychainStore::new(), args)
}

fn run_with(store: &dyn CredentialStore, args: AuthArgs) -> Result<()> {
    let agent = args.agent;

    if args.status {
        let stored = store
            .is_authenticated(agent)
            .map_err(crate::Error::from)
            .with_context(|| format!("auth status for {} failed", agent))?;
        if stored {
            println!("✓ {} is authenticated", agent);
            return Ok(());
        }
        return Err(crate::Error::NotAuthenticated(agent).into());
    }

    if args.clear {
        store
            .clear(agent)
            .map_err(crate::Error::from)
            .with_context(|| format!("clearing credential for {} failed", agent))?;
        println!("✓ Cleared credential for {}", agent);
        return Ok(());
    }

    let secret = read_secret(agent)?;
    store
        .store(agent, &Credential::new(secret))
        .map_err(crate::Error::from)
        .with_context(|| format!("storing credential for {} failed", agent))?;
    println!("✓ Stored credential for {}", agent);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;

    fn args(agent: Agent, clear: bool, status: bool) -> AuthArgs {
        AuthArgs {
            agent,
            clear,
            status,
        }
    }

    #[test]
    fn test_status_missing_maps_to_not_authenticated() {
        let store = MemoryCredentialStore::new();
        let err = run_with(&store, args(Agent::Gemini, false, true)).unwrap_err();
        let inner = err.downcast_ref::<crate::Error>().unwrap();
        assert_eq!(inner.exit_code(), crate::error::EXIT_NOT_AUTHENTICATED);
    }

    #[test]
    fn test_status_and_clear() {
        let store = MemoryCredentialStore::with(Agent::Claude, "sk-test");
        run_with(&store, args(Agent::Claude, false, true)).unwrap();
        run_with(&store, args(Agent::Claude, true, false)).unwrap();
        assert!(!store.is_authenticated(Agent::Claude).unwrap());
    }
}
