//! User configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::containers::Engine;

pub const APP_NAME: &str = "arbor";
pub const CONFIG_DIR_ENV: &str = "ARBOR_CONFIG_DIR";
pub const DATA_DIR_ENV: &str = "ARBOR_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub worktree: WorktreeConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: Engine,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            image: default_image(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

fn default_image() -> String {
    "ghcr.io/njbrake/aoe-sandbox:latest".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeConfig {
    #[serde(default = "default_worktree_template")]
    pub path_template: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            path_template: default_worktree_template(),
        }
    }
}

fn default_worktree_template() -> String {
    "../{repo-name}-worktrees/{branch}".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Host variable names passed through into the container.
    #[serde(default)]
    pub environment: Vec<String>,

    /// `KEY = "value"` pairs; a value starting with `$` is read from the host.
    #[serde(default)]
    pub environment_values: BTreeMap<String, String>,

    /// `host:container[:ro]` bind mounts added next to the worktree mount.
    #[serde(default)]
    pub extra_volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Launch agents with their auto-approve flag.
    #[serde(default)]
    pub yolo_mode: bool,
}

/// Directory holding `config.toml`.
pub fn get_app_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Root directory for tool-owned state (catalogs).
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_dir().context("Could not determine data directory")?;
    Ok(base.join(APP_NAME))
}

/// Catalog directory for one repository. Branch names are only unique within a
/// repository, so each repository gets its own catalog keyed by its canonical path.
pub fn catalog_dir_for_repo(data_dir: &Path, repo_root: &Path) -> PathBuf {
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let short: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());

    data_dir
        .join("repos")
        .join(format!("{}-{}", name, short))
        .join("catalog")
}

fn config_path() -> Result<PathBuf> {
    Ok(get_app_dir()?.join("config.toml"))
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.runtime.stop_timeout_secs)
    }
}
