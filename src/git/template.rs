// Path template system for worktrees

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

pub struct TemplateVars {
    pub repo_name: String,
    pub branch: String,
    pub base_path: PathBuf,
}

pub fn sanitize_branch_name(branch: &str) -> String {
    branch.replace(
        ['/', '@', '#', '\\', ':', '*', '?', '"', '<', '>', '|'],
        "-",
    )
}

/// Directory name for a branch's worktree. Distinct branches always get
/// distinct names: when sanitizing changed the branch, a short hash of the
/// original name is appended (`feat/a` -> `feat-a-<hash>`, `feat-a` -> `feat-a`).
pub fn worktree_dir_name(branch: &str) -> String {
    let sanitized = sanitize_branch_name(branch);
    if sanitized == branch {
        return sanitized;
    }
    let digest = Sha256::digest(branch.as_bytes());
    let short: String = digest.iter().take(3).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", sanitized, short)
}

/// Lexically resolve `.` and `..` so the same branch always maps to one
/// spelling of its worktree path.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn resolve_template(template: &str, vars: &TemplateVars) -> PathBuf {
    let dir_name = worktree_dir_name(&vars.branch);

    let resolved = template
        .replace("{repo-name}", &vars.repo_name)
        .replace("{branch}", &dir_name);

    let path = if resolved.starts_with('/') {
        PathBuf::from(resolved)
    } else {
        vars.base_path.join(&resolved)
    };

    normalize_path(&path)
}
