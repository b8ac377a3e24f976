use super::container_interface::{
    ContainerRuntimeInterface, ContainerSpec, ContainerState, ManagedContainer,
};
use super::error::{Result, RuntimeError};
use super::{Engine, LABEL_BRANCH, LABEL_MANAGED, LABEL_REPO};
use serde::Deserialize;
use std::io::ErrorKind;
use std::process::{Command, Output};
use std::time::Duration;

/// Runtime adapter over a docker-compatible engine CLI (`docker` or `podman`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Docker {
    engine: Engine,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateJson {
    running: bool,
    #[serde(default)]
    exit_code: Option<i64>,
}

impl Docker {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    fn binary(&self) -> &'static str {
        self.engine.binary()
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        self.run_with_env(args, &[])
    }

    fn run_with_env(&self, args: &[&str], env: &[(String, String)]) -> Result<Output> {
        tracing::debug!("{} {}", self.binary(), args.join(" "));
        Command::new(self.binary())
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    RuntimeError::NotInstalled(self.binary().to_string())
                } else {
                    RuntimeError::Io(e)
                }
            })
    }

    /// Build the `create` arguments from the container spec.
    /// Separated from `create` to enable unit testing.
    pub(crate) fn build_create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "-w".to_string(),
            spec.working_dir.clone(),
        ];

        for vol in &spec.volumes {
            let mount = if vol.read_only {
                format!("{}:{}:ro", vol.host_path, vol.container_path)
            } else {
                format!("{}:{}", vol.host_path, vol.container_path)
            };
            args.push("-v".to_string());
            args.push(mount);
        }

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        // Values travel through the engine's own environment.
        for (key, _) in &spec.environment {
            args.push("-e".to_string());
            args.push(key.clone());
        }

        if let Some(cpu) = &spec.cpu_limit {
            args.push("--cpus".to_string());
            args.push(cpu.clone());
        }

        if let Some(mem) = &spec.memory_limit {
            args.push("-m".to_string());
            args.push(mem.clone());
        }

        args.push(spec.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        args
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

/// Map a failed engine invocation onto the error the caller should see.
fn classify_failure(stderr: &str, id: &str, action: &'static str) -> RuntimeError {
    if is_not_found(stderr) {
        return RuntimeError::NotFound(id.to_string());
    }
    if stderr.contains("permission denied") && stderr.contains("docker.sock") {
        return RuntimeError::PermissionDenied;
    }
    if stderr.contains("Cannot connect to the Docker daemon") {
        return RuntimeError::DaemonNotRunning;
    }
    RuntimeError::engine(action, stderr.trim())
}

fn parse_state(stdout: &str) -> Result<ContainerState> {
    let state: StateJson = serde_json::from_str(stdout.trim())
        .map_err(|e| RuntimeError::engine("inspect", format!("unexpected output: {}", e)))?;
    Ok(ContainerState {
        running: state.running,
        exit_code: state.exit_code,
    })
}

fn parse_managed(stdout: &str) -> Vec<ManagedContainer> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.splitn(4, '\t');
            let id = cols.next()?.trim();
            let name = cols.next()?.trim();
            let branch = cols.next().unwrap_or("").trim();
            let repo = cols.next().unwrap_or("").trim();
            if id.is_empty() {
                return None;
            }
            Some(ManagedContainer {
                id: id.to_string(),
                name: name.to_string(),
                branch: branch.to_string(),
                repo: repo.to_string(),
            })
        })
        .collect()
}

impl ContainerRuntimeInterface for Docker {
    fn is_available(&self) -> bool {
        self.run(&["info"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let args = Self::build_create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_with_env(&arg_refs, &spec.environment)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("stderr: {}", stderr);
            if stderr.contains("is already in use") {
                return Err(RuntimeError::AlreadyExists(spec.name.clone()));
            }
            if stderr.contains("No such image") || stderr.contains("Unable to find image") {
                return Err(RuntimeError::ImageNotFound(spec.image.clone()));
            }
            return Err(classify_failure(&stderr, &spec.name, "create"));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!("Created container {} ({})", spec.name, container_id);
        Ok(container_id)
    }

    fn start(&self, id: &str) -> Result<()> {
        let output = self.run(&["start", id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, id, "start"));
        }

        Ok(())
    }

    fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        let output = self.run(&["stop", "-t", &secs, id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = classify_failure(&stderr, id, "stop");
            if matches!(err, RuntimeError::NotFound(_)) {
                return Err(err);
            }
            tracing::warn!("Graceful stop of {} failed, killing: {}", id, stderr.trim());
            return self.kill(id);
        }

        if self.inspect(id)?.running {
            tracing::warn!("Container {} still running after stop, killing", id);
            self.kill(id)?;
        }

        Ok(())
    }

    fn kill(&self, id: &str) -> Result<()> {
        let output = self.run(&["kill", id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("is not running") {
                return Ok(());
            }
            return Err(classify_failure(&stderr, id, "kill"));
        }

        Ok(())
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(id);

        let output = self.run(&args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, id, "remove"));
        }

        Ok(())
    }

    fn inspect(&self, id: &str) -> Result<ContainerState> {
        let output = self.run(&[
            "inspect",
            "--type",
            "container",
            "--format",
            "{{json .State}}",
            id,
        ])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, id, "inspect"));
        }

        parse_state(&String::from_utf8_lossy(&output.stdout))
    }

    fn exec(&self, id: &str, cmd: &[&str]) -> Result<Output> {
        let mut args = vec!["exec", id];
        args.extend(cmd);
        self.run(&args)
    }

    fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let output = self.run(&["logs", "--tail", &tail, id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, id, "logs"));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let filter = format!("label={}=true", LABEL_MANAGED);
        let format = format!(
            "{{{{.ID}}}}\t{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}\t{{{{.Label \"{}\"}}}}",
            LABEL_BRANCH, LABEL_REPO
        );
        let output = self.run(&[
            "ps",
            "-a",
            "--no-trunc",
            "--filter",
            &filter,
            "--format",
            &format,
        ])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, "", "listing"));
        }

        Ok(parse_managed(&String::from_utf8_lossy(&output.stdout)))
    }

    fn exec_command(&self, id: &str) -> Vec<String> {
        vec![
            self.binary().to_string(),
            "exec".to_string(),
            "-it".to_string(),
            id.to_string(),
        ]
    }
}
