//! tmux driven through `<engine> exec` inside instance containers.

use std::collections::HashMap;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{MuxError, Result};
use super::utils::{is_missing_target, is_no_server, is_pane_id, parse_pane_ids, strip_ansi};
use super::{AttachOutcome, Multiplexer, SessionCommand, SESSION_NAME};
use crate::containers::ContainerRuntimeInterface;

const PANE_FORMAT: &str = "#{pane_id}";

pub struct ContainerTmux {
    runtime: Arc<dyn ContainerRuntimeInterface>,
    /// One creation lock per container; different containers never contend.
    create_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerTmux {
    pub fn new(runtime: Arc<dyn ContainerRuntimeInterface>) -> Self {
        Self {
            runtime,
            create_locks: Mutex::new(HashMap::new()),
        }
    }

    fn create_lock(&self, container_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .create_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(container_id.to_string()).or_default())
    }

    fn tmux(&self, container_id: &str, args: &[String]) -> Result<Output> {
        let mut cmd: Vec<&str> = vec!["tmux"];
        cmd.extend(args.iter().map(String::as_str));
        debug!("[{}] {}", container_id, cmd.join(" "));
        Ok(self.runtime.exec(container_id, &cmd)?)
    }

    fn failure(args: &[String], output: &Output) -> MuxError {
        MuxError::CommandFailed {
            command: args.first().cloned().unwrap_or_default(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    fn has_session(&self, container_id: &str) -> Result<bool> {
        let args = vec![
            "has-session".to_string(),
            "-t".to_string(),
            SESSION_NAME.to_string(),
        ];
        Ok(self.tmux(container_id, &args)?.status.success())
    }

    /// `new-session` for the first pane, `new-window` afterwards. Both print
    /// the new pane id.
    pub(crate) fn new_session_args(first: bool, command: &SessionCommand) -> Vec<String> {
        let mut args: Vec<String> = if first {
            vec![
                "new-session".into(),
                "-d".into(),
                "-s".into(),
                SESSION_NAME.into(),
            ]
        } else {
            vec![
                "new-window".into(),
                "-d".into(),
                "-t".into(),
                format!("{}:", SESSION_NAME),
            ]
        };

        args.extend(["-P".into(), "-F".into(), PANE_FORMAT.into()]);

        if !command.working_dir.is_empty() {
            args.push("-c".into());
            args.push(command.working_dir.clone());
        }

        for (key, value) in &command.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }

        if !command.command.is_empty() {
            args.push(command.command.clone());
        }

        args
    }

    /// Interactive client that focuses the pane's window, then attaches.
    pub(crate) fn attach_args(&self, container_id: &str, session_id: &str) -> Vec<String> {
        let mut args = self.runtime.exec_command(container_id);
        args.extend(
            [
                "tmux",
                "select-window",
                "-t",
                session_id,
                ";",
                "select-pane",
                "-t",
                session_id,
                ";",
                "attach-session",
                "-t",
                SESSION_NAME,
            ]
            .map(String::from),
        );
        args
    }

    fn spawn_pane(&self, container_id: &str, command: &SessionCommand) -> Result<String> {
        let first = !self.has_session(container_id)?;
        let args = Self::new_session_args(first, command);
        let mut output = self.tmux(container_id, &args)?;

        // Another process created the session between the check and our call.
        if first
            && !output.status.success()
            && String::from_utf8_lossy(&output.stderr).contains("duplicate session")
        {
            let retry = Self::new_session_args(false, command);
            output = self.tmux(container_id, &retry)?;
            if !output.status.success() {
                return Err(Self::failure(&retry, &output));
            }
        } else if !output.status.success() {
            return Err(Self::failure(&args, &output));
        }

        let pane = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !is_pane_id(&pane) {
            return Err(MuxError::BadPaneId(pane));
        }
        Ok(pane)
    }
}

fn list_panes(runtime: &dyn ContainerRuntimeInterface, container_id: &str) -> Result<Vec<String>> {
    let output = runtime.exec(
        container_id,
        &["tmux", "list-panes", "-a", "-F", PANE_FORMAT],
    )?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_no_server(&stderr) {
            return Ok(Vec::new());
        }
        return Err(MuxError::CommandFailed {
            command: "list-panes".to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(parse_pane_ids(&String::from_utf8_lossy(&output.stdout)))
}

impl Multiplexer for ContainerTmux {
    fn new_session(&self, container_id: &str, command: &SessionCommand) -> Result<String> {
        let lock = self.create_lock(container_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let pane = self.spawn_pane(container_id, command)?;
        info!("Started pane {} in {}", pane, container_id);
        Ok(pane)
    }

    fn attach(
        &self,
        container_id: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<AttachOutcome>> {
        let argv = self.attach_args(container_id, session_id);
        let runtime = Arc::clone(&self.runtime);
        let container_id = container_id.to_string();
        let session_id = session_id.to_string();

        Box::pin(async move {
            let Some((program, args)) = argv.split_first() else {
                return Err(MuxError::CommandFailed {
                    command: "attach".to_string(),
                    stderr: "empty exec command".to_string(),
                });
            };
            debug!("{} {}", program, args.join(" "));

            let mut child = tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()?;

            let status = tokio::select! {
                status = child.wait() => status?,
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to stop attach client: {}", e);
                    }
                    return Ok(AttachOutcome::Cancelled);
                }
            };

            let probe_id = container_id.clone();
            let panes = tokio::task::spawn_blocking(move || list_panes(runtime.as_ref(), &probe_id))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
            let alive = panes.contains(&session_id);

            match (status.success(), alive) {
                (true, true) => Ok(AttachOutcome::Detached),
                (true, false) => Ok(AttachOutcome::RemoteExited),
                (false, false) => Err(MuxError::PaneNotFound(session_id)),
                (false, true) => Err(MuxError::AttachFailed(status.code().unwrap_or(-1))),
            }
        })
    }

    fn list_sessions(&self, container_id: &str) -> Result<Vec<String>> {
        list_panes(self.runtime.as_ref(), container_id)
    }

    fn kill_session(&self, container_id: &str, session_id: &str) -> Result<()> {
        let args = vec![
            "kill-pane".to_string(),
            "-t".to_string(),
            session_id.to_string(),
        ];
        let output = self.tmux(container_id, &args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_target(&stderr) || is_no_server(&stderr) {
                return Ok(());
            }
            return Err(Self::failure(&args, &output));
        }
        Ok(())
    }

    fn capture(&self, container_id: &str, session_id: &str, lines: usize) -> Result<String> {
        let args = vec![
            "capture-pane".to_string(),
            "-p".to_string(),
            "-t".to_string(),
            session_id.to_string(),
            "-S".to_string(),
            format!("-{}", lines),
        ];
        let output = self.tmux(container_id, &args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_target(&stderr) || is_no_server(&stderr) {
                return Err(MuxError::PaneNotFound(session_id.to_string()));
            }
            return Err(Self::failure(&args, &output));
        }
        let text = strip_ansi(&String::from_utf8_lossy(&output.stdout));
        Ok(text.trim_end().to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::containers::{
        ContainerSpec, ContainerState, ManagedContainer, Result as RuntimeResult,
    };
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::time::Duration;

    /// Runtime whose `exec` emulates just enough tmux to drive the driver.
    #[derive(Default)]
    struct ScriptedRuntime {
        calls: Mutex<Vec<Vec<String>>>,
        panes: Mutex<Vec<String>>,
        next_pane: Mutex<u32>,
        /// Report "no session" from has-session but fail new-session as duplicate.
        race_once: Mutex<bool>,
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    impl ContainerRuntimeInterface for ScriptedRuntime {
        fn is_available(&self) -> bool {
            true
        }
        fn create(&self, _spec: &ContainerSpec) -> RuntimeResult<String> {
            unimplemented!()
        }
        fn start(&self, _id: &str) -> RuntimeResult<()> {
            Ok(())
        }
        fn stop(&self, _id: &str, _timeout: Duration) -> RuntimeResult<()> {
            Ok(())
        }
        fn kill(&self, _id: &str) -> RuntimeResult<()> {
            Ok(())
        }
        fn remove(&self, _id: &str, _force: bool) -> RuntimeResult<()> {
            Ok(())
        }
        fn inspect(&self, _id: &str) -> RuntimeResult<ContainerState> {
            Ok(ContainerState {
                running: true,
                exit_code: None,
            })
        }
        fn exec(&self, _id: &str, cmd: &[&str]) -> RuntimeResult<Output> {
            self.calls
                .lock()
                .unwrap()
                .push(cmd.iter().map(|s| s.to_string()).collect());
            let mut panes = self.panes.lock().unwrap();
            let out = match cmd.get(1).copied() {
                Some("has-session") => {
                    if panes.is_empty() || *self.race_once.lock().unwrap() {
                        output(1, "", "can't find session: arbor")
                    } else {
                        output(0, "", "")
                    }
                }
                Some("new-session") => {
                    let mut race = self.race_once.lock().unwrap();
                    if *race {
                        *race = false;
                        output(1, "", "duplicate session: arbor")
                    } else {
                        let mut n = self.next_pane.lock().unwrap();
                        let id = format!("%{}", *n);
                        *n += 1;
                        panes.push(id.clone());
                        output(0, &format!("{}\n", id), "")
                    }
                }
                Some("new-window") => {
                    let mut n = self.next_pane.lock().unwrap();
                    let id = format!("%{}", *n);
                    *n += 1;
                    panes.push(id.clone());
                    output(0, &format!("{}\n", id), "")
                }
                Some("list-panes") => {
                    if panes.is_empty() {
                        output(1, "", "no server running on /tmp/tmux-0/default")
                    } else {
                        output(0, &panes.join("\n"), "")
                    }
                }
                Some("kill-pane") => {
                    let target = cmd[3];
                    if panes.iter().any(|p| p == target) {
                        panes.retain(|p| p != target);
                        output(0, "", "")
                    } else {
                        output(1, "", &format!("can't find pane: {}", target))
                    }
                }
                Some("capture-pane") => {
                    if panes.iter().any(|p| p == cmd[4]) {
                        output(0, "\x1b[32m$ make test\x1b[0m\nok\n\n", "")
                    } else {
                        output(1, "", "can't find pane: x")
                    }
                }
                _ => output(1, "", "unknown command"),
            };
            Ok(out)
        }
        fn logs(&self, _id: &str, _tail: usize) -> RuntimeResult<String> {
            Ok(String::new())
        }
        fn list_managed(&self) -> RuntimeResult<Vec<ManagedContainer>> {
            Ok(Vec::new())
        }
        fn exec_command(&self, id: &str) -> Vec<String> {
            vec!["docker".into(), "exec".into(), "-it".into(), id.into()]
        }
    }

    fn driver() -> (Arc<ScriptedRuntime>, ContainerTmux) {
        let runtime = Arc::new(ScriptedRuntime::default());
        let tmux = ContainerTmux::new(runtime.clone());
        (runtime, tmux)
    }

    fn shell() -> SessionCommand {
        SessionCommand {
            command: "bash -l".to_string(),
            env: vec![("ANTHROPIC_API_KEY".to_string(), "sk".to_string())],
            working_dir: "/workspace".to_string(),
        }
    }

    #[test]
    fn test_new_session_args() {
        let first = ContainerTmux::new_session_args(true, &shell());
        assert_eq!(&first[..4], &["new-session", "-d", "-s", "arbor"]);
        assert!(first.windows(2).any(|w| w == ["-F", "#{pane_id}"]));
        assert!(first.windows(2).any(|w| w == ["-e", "ANTHROPIC_API_KEY=sk"]));
        assert!(first.windows(2).any(|w| w == ["-c", "/workspace"]));
        assert_eq!(first.last().unwrap(), "bash -l");

        let next = ContainerTmux::new_session_args(false, &shell());
        assert_eq!(&next[..4], &["new-window", "-d", "-t", "arbor:"]);
    }

    #[test]
    fn test_first_pane_creates_session_then_windows() {
        let (runtime, tmux) = driver();
        assert_eq!(tmux.new_session("c1", &shell()).unwrap(), "%0");
        assert_eq!(tmux.new_session("c1", &shell()).unwrap(), "%1");

        let verbs: Vec<String> = runtime
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c[1].clone())
            .collect();
        assert_eq!(
            verbs,
            vec!["has-session", "new-session", "has-session", "new-window"]
        );
        assert_eq!(tmux.list_sessions("c1").unwrap(), vec!["%0", "%1"]);
    }

    #[test]
    fn test_duplicate_session_race_falls_back_to_window() {
        let (runtime, tmux) = driver();
        *runtime.race_once.lock().unwrap() = true;
        let pane = tmux.new_session("c1", &shell()).unwrap();
        assert_eq!(pane, "%0");
        let last = runtime.calls.lock().unwrap().last().unwrap().clone();
        assert_eq!(last[1], "new-window");
    }

    #[test]
    fn test_list_sessions_without_server_is_empty() {
        let (_runtime, tmux) = driver();
        assert!(tmux.list_sessions("c1").unwrap().is_empty());
    }

    #[test]
    fn test_kill_session_is_idempotent() {
        let (_runtime, tmux) = driver();
        let pane = tmux.new_session("c1", &shell()).unwrap();
        tmux.kill_session("c1", &pane).unwrap();
        tmux.kill_session("c1", &pane).unwrap();
    }

    #[test]
    fn test_capture_strips_escapes() {
        let (_runtime, tmux) = driver();
        let pane = tmux.new_session("c1", &shell()).unwrap();
        assert_eq!(tmux.capture("c1", &pane, 50).unwrap(), "$ make test\nok");
        assert!(matches!(
            tmux.capture("c1", "%99", 50),
            Err(MuxError::PaneNotFound(_))
        ));
    }

    #[test]
    fn test_attach_args_focus_pane_then_attach() {
        let (_runtime, tmux) = driver();
        let args = tmux.attach_args("c1", "%4");
        assert_eq!(&args[..5], &["docker", "exec", "-it", "c1", "tmux"]);
        assert_eq!(
            &args[5..],
            &[
                "select-window",
                "-t",
                "%4",
                ";",
                "select-pane",
                "-t",
                "%4",
                ";",
                "attach-session",
                "-t",
                "arbor"
            ]
        );
    }

    #[test]
    fn test_creation_is_serialized_per_container() {
        let (runtime, tmux) = driver();
        let tmux = Arc::new(tmux);
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let tmux = Arc::clone(&tmux);
                std::thread::spawn(move || tmux.new_session("c1", &shell()).unwrap())
            })
            .collect();
        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);

        let new_sessions = runtime
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c[1] == "new-session")
            .count();
        assert_eq!(new_sessions, 1);
    }
}
