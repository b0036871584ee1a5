//! Remote branch lock check.
//!
//! The lock is optimistic: two dispatchers can both see "available" and race
//! to create the same branch. Only a push can settle that race.

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::lock::{lock_name, validate_lock_name};
use crate::io::git::Git;
use crate::io::process::CommandRunner;

/// State of a task's lock on the shared remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// Nobody holds the branch; the name is free to claim.
    Available(String),
    /// The branch exists on the remote.
    Held(String),
}

/// Derive the lock name for `task_id` and look it up on `remote`.
#[instrument(skip_all, fields(remote, agent, task_id))]
pub fn check_lock<R: CommandRunner>(
    git: &Git<R>,
    remote: &str,
    agent: &str,
    task_id: &str,
) -> Result<LockStatus> {
    let branch = lock_name(agent, task_id);
    validate_lock_name(&branch)?;
    if git.remote_branch_exists(remote, &branch)? {
        info!(branch = %branch, "lock held on remote");
        return Ok(LockStatus::Held(branch));
    }
    Ok(LockStatus::Available(branch))
}
