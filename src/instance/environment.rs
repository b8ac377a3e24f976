//! Environment variable and command-line helpers for instance containers.
//!
//! Pure functions for building the environment handed to containers and
//! sessions, and the shell command each session pane runs.

use crate::agents::{Agent, PromptStyle};
use crate::config::SandboxConfig;

/// Terminal environment variables that are always passed through for proper UI/theming
pub(crate) const DEFAULT_TERMINAL_ENV_VARS: &[&str] =
    &["TERM", "COLORTERM", "FORCE_COLOR", "NO_COLOR"];

/// Shell-escape a value for safe interpolation into a shell command string.
/// Uses double-quote escaping so values can be nested inside `bash -c '...'`.
pub(crate) fn shell_escape(val: &str) -> String {
    let escaped = val
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    format!("\"{}\"", escaped)
}

/// Resolve an environment_values entry. If the value starts with `$`, read the
/// named variable from the host environment (use `$$` to escape a literal `$`).
/// Otherwise return the literal value.
pub(crate) fn resolve_env_value(val: &str) -> Option<String> {
    if let Some(rest) = val.strip_prefix("$$") {
        Some(format!("${}", rest))
    } else if let Some(var_name) = val.strip_prefix('$') {
        std::env::var(var_name).ok()
    } else {
        Some(val.to_string())
    }
}

/// Host variable names to pass through: terminal defaults plus configured names.
pub(crate) fn collect_env_keys(sandbox: &SandboxConfig) -> Vec<String> {
    let mut env_keys: Vec<String> = DEFAULT_TERMINAL_ENV_VARS
        .iter()
        .map(|s| s.to_string())
        .collect();

    for key in &sandbox.environment {
        if !env_keys.contains(key) {
            env_keys.push(key.clone());
        }
    }

    env_keys
}

/// Resolved `KEY=value` pairs from `environment_values`.
pub(crate) fn collect_env_values(sandbox: &SandboxConfig) -> Vec<(String, String)> {
    sandbox
        .environment_values
        .iter()
        .filter_map(|(key, val)| resolve_env_value(val).map(|v| (key.clone(), v)))
        .collect()
}

fn upsert(env: &mut Vec<(String, String)>, key: &str, value: String) {
    if let Some(slot) = env.iter_mut().find(|(k, _)| k == key) {
        slot.1 = value;
    } else {
        env.push((key.to_string(), value));
    }
}

/// Environment for a new container: host passthrough, configured values, then
/// the agent credential. Later sources win on duplicate keys.
pub fn container_environment(
    sandbox: &SandboxConfig,
    credential: Option<(&str, &str)>,
) -> Vec<(String, String)> {
    let mut env = Vec::new();

    for key in collect_env_keys(sandbox) {
        if let Ok(val) = std::env::var(&key) {
            upsert(&mut env, &key, val);
        }
    }

    for (key, val) in collect_env_values(sandbox) {
        upsert(&mut env, &key, val);
    }

    if let Some((key, secret)) = credential {
        upsert(&mut env, key, secret.to_string());
    }

    env
}

/// Environment for a new session pane. Only what may have changed since the
/// container was created: terminal variables and the fresh credential.
pub fn session_environment(credential: Option<(&str, &str)>) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = DEFAULT_TERMINAL_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect();

    if let Some((key, secret)) = credential {
        upsert(&mut env, key, secret.to_string());
    }

    env
}

/// The command line a session pane runs. A missing agent means a plain login shell.
pub fn build_agent_command(agent: Option<Agent>, prompt: Option<&str>, yolo_mode: bool) -> String {
    let Some(agent) = agent else {
        return "bash -l".to_string();
    };

    let def = agent.def();
    let mut cmd = def.binary.to_string();

    if yolo_mode {
        cmd.push(' ');
        cmd.push_str(def.yolo_flag);
    }

    if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
        match def.prompt {
            PromptStyle::Positional => {
                cmd.push(' ');
                cmd.push_str(&shell_escape(prompt));
            }
            PromptStyle::Flag(flag) => {
                cmd.push(' ');
                cmd.push_str(flag);
                cmd.push(' ');
                cmd.push_str(&shell_escape(prompt));
            }
        }
    }

    wrap_command_ignore_suspend(&cmd)
}

/// Wrap a command to disable Ctrl-Z (SIGTSTP) suspension.
///
/// Agents run directly as the pane command without a parent shell, so a
/// suspended agent could never be resumed. `stty susp undef` is POSIX and
/// works with every shell shipped in the image.
pub(crate) fn wrap_command_ignore_suspend(cmd: &str) -> String {
    format!("bash -c 'stty susp undef; exec {}'", cmd.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::BTreeMap;

    #[test]
    fn test_shell_escape_simple() {
        assert_eq!(shell_escape("hello"), "\"hello\"");
    }

    #[test]
    fn test_shell_escape_quotes() {
        assert_eq!(shell_escape(r#"say "hi""#), r#""say \"hi\"""#);
    }

    #[test]
    fn test_shell_escape_dollar_and_backtick() {
        assert_eq!(shell_escape("$HOME `id`"), "\"\\$HOME \\`id\\`\"");
    }

    #[test]
    fn test_shell_escape_newline() {
        assert_eq!(shell_escape("a\nb\r"), "\"a\\nb\\r\"");
    }

    #[test]
    fn test_resolve_env_value_literal() {
        assert_eq!(resolve_env_value("plain"), Some("plain".to_string()));
        assert_eq!(resolve_env_value("$$literal"), Some("$literal".to_string()));
    }

    #[test]
    #[serial]
    fn test_resolve_env_value_from_host() {
        std::env::set_var("ARBOR_TEST_HOST_VALUE", "from-host");
        assert_eq!(
            resolve_env_value("$ARBOR_TEST_HOST_VALUE"),
            Some("from-host".to_string())
        );
        std::env::remove_var("ARBOR_TEST_HOST_VALUE");
        assert_eq!(resolve_env_value("$ARBOR_TEST_HOST_VALUE"), None);
    }

    #[test]
    fn test_collect_env_keys_dedups() {
        let sandbox = SandboxConfig {
            environment: vec!["TERM".to_string(), "GH_TOKEN".to_string()],
            ..Default::default()
        };
        let keys = collect_env_keys(&sandbox);
        assert_eq!(keys.iter().filter(|k| *k == "TERM").count(), 1);
        assert!(keys.contains(&"GH_TOKEN".to_string()));
    }

    #[test]
    #[serial]
    fn test_container_environment_credential_wins() {
        let mut values = BTreeMap::new();
        values.insert("ANTHROPIC_API_KEY".to_string(), "from-config".to_string());
        values.insert("EDITOR".to_string(), "vim".to_string());
        let sandbox = SandboxConfig {
            environment_values: values,
            ..Default::default()
        };

        let env = container_environment(&sandbox, Some(("ANTHROPIC_API_KEY", "sk-fresh")));

        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("ANTHROPIC_API_KEY"), Some("sk-fresh"));
        assert_eq!(get("EDITOR"), Some("vim"));
        assert_eq!(
            env.iter().filter(|(k, _)| k == "ANTHROPIC_API_KEY").count(),
            1
        );
    }

    #[test]
    fn test_session_environment_carries_credential() {
        let env = session_environment(Some(("OPENAI_API_KEY", "sk-x")));
        assert!(env.contains(&("OPENAI_API_KEY".to_string(), "sk-x".to_string())));
    }

    #[test]
    fn test_build_agent_command_shell() {
        assert_eq!(build_agent_command(None, Some("ignored"), true), "bash -l");
    }

    #[test]
    fn test_build_agent_command_positional_prompt() {
        let cmd = build_agent_command(Some(Agent::Claude), Some("fix the tests"), false);
        assert_eq!(
            cmd,
            "bash -c 'stty susp undef; exec claude \"fix the tests\"'"
        );
    }

    #[test]
    fn test_build_agent_command_flag_prompt_and_yolo() {
        let cmd = build_agent_command(Some(Agent::Gemini), Some("hi"), true);
        assert_eq!(
            cmd,
            "bash -c 'stty susp undef; exec gemini --approval-mode yolo -i \"hi\"'"
        );
    }

    #[test]
    fn test_build_agent_command_blank_prompt_is_dropped() {
        let cmd = build_agent_command(Some(Agent::Codex), Some("   "), false);
        assert_eq!(cmd, "bash -c 'stty susp undef; exec codex'");
    }

    #[test]
    fn test_wrap_escapes_single_quotes() {
        let cmd = build_agent_command(Some(Agent::Claude), Some("don't"), false);
        assert_eq!(
            cmd,
            "bash -c 'stty susp undef; exec claude \"don'\\''t\"'"
        );
    }
}
