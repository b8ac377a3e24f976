//! Centralized agent registry.
//!
//! All per-agent metadata lives here. Adding a new agent means adding a variant
//! to [`Agent`] and one `AgentDef` entry to `AGENTS`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A coding agent CLI that can run inside a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    #[value(alias = "claude-code")]
    Claude,
    #[value(alias = "gemini-cli")]
    Gemini,
    #[value(alias = "openai-codex")]
    Codex,
}

/// How the initial prompt is handed to the agent binary.
pub enum PromptStyle {
    /// Prompt is the trailing positional argument.
    Positional,
    /// Prompt follows a flag (e.g. `-i`).
    Flag(&'static str),
}

/// Everything we know about a single agent CLI.
pub struct AgentDef {
    pub agent: Agent,
    /// Canonical name: `"claude"`, `"gemini"`, `"codex"`.
    pub name: &'static str,
    /// Binary to invoke inside the container.
    pub binary: &'static str,
    /// Alternative names accepted by [`resolve_agent`].
    pub aliases: &'static [&'static str],
    /// Environment variable the stored credential is exported as.
    pub credential_env: &'static str,
    /// Auto-approve flag appended when yolo mode is on.
    pub yolo_flag: &'static str,
    pub prompt: PromptStyle,
}

pub const AGENTS: &[AgentDef] = &[
    AgentDef {
        agent: Agent::Claude,
        name: "claude",
        binary: "claude",
        aliases: &["claude-code"],
        credential_env: "ANTHROPIC_API_KEY",
        yolo_flag: "--dangerously-skip-permissions",
        prompt: PromptStyle::Positional,
    },
    AgentDef {
        agent: Agent::Gemini,
        name: "gemini",
        binary: "gemini",
        aliases: &["gemini-cli"],
        credential_env: "GEMINI_API_KEY",
        yolo_flag: "--approval-mode yolo",
        prompt: PromptStyle::Flag("-i"),
    },
    AgentDef {
        agent: Agent::Codex,
        name: "codex",
        binary: "codex",
        aliases: &["openai-codex"],
        credential_env: "OPENAI_API_KEY",
        yolo_flag: "--dangerously-bypass-approvals-and-sandbox",
        prompt: PromptStyle::Positional,
    },
];

impl Agent {
    pub fn def(self) -> &'static AgentDef {
        match self {
            Agent::Claude => &AGENTS[0],
            Agent::Gemini => &AGENTS[1],
            Agent::Codex => &AGENTS[2],
        }
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve_agent(s).ok_or_else(|| {
            format!(
                "unknown agent '{}' (expected one of: {})",
                s,
                agent_names().join(", ")
            )
        })
    }
}

/// All canonical agent names in registry order.
pub fn agent_names() -> Vec<&'static str> {
    AGENTS.iter().map(|a| a.name).collect()
}

/// Resolve a user-supplied name or alias (case-insensitive) to an agent.
pub fn resolve_agent(name: &str) -> Option<Agent> {
    let lower = name.trim().to_lowercase();
    AGENTS
        .iter()
        .find(|a| a.name == lower || a.aliases.contains(&lower.as_str()))
        .map(|a| a.agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_has_a_def() {
        for agent in [Agent::Claude, Agent::Gemini, Agent::Codex] {
            assert_eq!(agent.def().agent, agent);
        }
    }

    #[test]
    fn test_agent_names() {
        assert_eq!(agent_names(), vec!["claude", "gemini", "codex"]);
    }

    #[test]
    fn test_resolve_agent() {
        assert_eq!(resolve_agent("claude"), Some(Agent::Claude));
        assert_eq!(resolve_agent("Claude-Code"), Some(Agent::Claude));
        assert_eq!(resolve_agent("gemini-cli"), Some(Agent::Gemini));
        assert_eq!(resolve_agent(" codex "), Some(Agent::Codex));
        assert_eq!(resolve_agent("opencode"), None);
        assert_eq!(resolve_agent(""), None);
    }

    #[test]
    fn test_from_str_error_lists_agents() {
        let err = "vim".parse::<Agent>().unwrap_err();
        assert!(err.contains("claude, gemini, codex"));
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Agent::Gemini).unwrap(), "\"gemini\"");
        let a: Agent = serde_json::from_str("\"codex\"").unwrap();
        assert_eq!(a, Agent::Codex);
    }

    #[test]
    fn test_cli_parser_accepts_registry_aliases() {
        use clap::ValueEnum;
        for def in AGENTS {
            for alias in def.aliases {
                assert_eq!(
                    <Agent as ValueEnum>::from_str(alias, true).unwrap(),
                    def.agent
                );
            }
        }
    }

    #[test]
    fn test_credential_env_vars_are_distinct() {
        let mut vars: Vec<_> = AGENTS.iter().map(|a| a.credential_env).collect();
        vars.sort();
        vars.dedup();
        assert_eq!(vars.len(), AGENTS.len());
    }
}
