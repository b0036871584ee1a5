//! Branch-as-lock naming.
//!
//! A task is claimed by the existence of `<agent>/task-<id>` on the shared
//! remote. Naming is pure so every dispatcher instance derives the same token.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

/// Bytes git never accepts anywhere in a ref name.
static FORBIDDEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x20\x7f~^:?*\[\\]").expect("valid ref regex"));

/// Derive the lock branch name for `task_id` owned by `agent`.
pub fn lock_name(agent: &str, task_id: &str) -> String {
    format!("{agent}/task-{task_id}")
}

/// True if `branch` is a claim branch of `agent` (any task).
pub fn is_claim_branch(agent: &str, branch: &str) -> bool {
    branch
        .strip_prefix(agent)
        .and_then(|rest| rest.strip_prefix("/task-"))
        .is_some_and(|id| !id.is_empty())
}

/// Reject lock names git would refuse as a branch (`git check-ref-format --branch`).
///
/// Anything else, including non-ASCII task ids, is accepted.
pub fn validate_lock_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("lock name must be non-empty");
    }
    if let Some(found) = FORBIDDEN_RE.find(name) {
        bail!(
            "invalid lock name '{name}': character {:?} is not allowed in a ref",
            found.as_str()
        );
    }
    if name.contains("..") {
        bail!("invalid lock name '{name}': contains '..'");
    }
    if name.contains("@{") || name == "@" {
        bail!("invalid lock name '{name}': contains '@{{' or is '@'");
    }
    if name.starts_with('-') {
        bail!("invalid lock name '{name}': branch names cannot start with '-'");
    }
    if name.ends_with('.') {
        bail!("invalid lock name '{name}': ends with '.'");
    }
    for component in name.split('/') {
        if component.is_empty() {
            bail!("invalid lock name '{name}': empty path component");
        }
        if component.starts_with('.') || component.ends_with(".lock") {
            bail!("invalid lock name '{name}': component '{component}' is reserved by git");
        }
    }
    Ok(())
}
