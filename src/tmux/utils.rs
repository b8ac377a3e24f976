//! tmux utility functions

pub fn strip_ansi(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("\x1b[") {
        let rest = &result[start + 2..];
        let end_offset = rest
            .find(|c: char| c.is_ascii_alphabetic())
            .map(|i| i + 1)
            .unwrap_or(rest.len());
        result = format!("{}{}", &result[..start], &result[start + 2 + end_offset..]);
    }

    while let Some(start) = result.find("\x1b]") {
        if let Some(end) = result[start..].find('\x07') {
            result = format!("{}{}", &result[..start], &result[start + end + 1..]);
        } else {
            break;
        }
    }

    result
}

/// Pane ids (`%N`) from `list-panes -F '#{pane_id}'` output.
pub fn parse_pane_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| is_pane_id(l))
        .map(str::to_string)
        .collect()
}

pub fn is_pane_id(s: &str) -> bool {
    s.strip_prefix('%')
        .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// stderr from a tmux client that found no server to talk to.
pub fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("error connecting to")
        || stderr.contains("no sessions")
}

pub fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("can't find pane")
        || stderr.contains("can't find window")
        || stderr.contains("can't find session")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[32mgreen\x1b[0m"), "green");
        assert_eq!(strip_ansi("no codes here"), "no codes here");
        assert_eq!(strip_ansi("\x1b[1;34mbold blue\x1b[0m"), "bold blue");
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
    }

    #[test]
    fn test_parse_pane_ids() {
        assert_eq!(parse_pane_ids("%0\n%12\n\ngarbage\n"), vec!["%0", "%12"]);
        assert!(parse_pane_ids("").is_empty());
    }

    #[test]
    fn test_is_pane_id() {
        assert!(is_pane_id("%3"));
        assert!(!is_pane_id("%"));
        assert!(!is_pane_id("3"));
        assert!(!is_pane_id("%3a"));
    }

    #[test]
    fn test_stderr_classification() {
        assert!(is_no_server("no server running on /tmp/tmux-0/default"));
        assert!(is_no_server("error connecting to /tmp/tmux-0/default (No such file or directory)"));
        assert!(is_missing_target("can't find pane: %9"));
        assert!(!is_missing_target("unknown command"));
    }
}
