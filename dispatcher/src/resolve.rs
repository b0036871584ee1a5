//! Resolution of agent identity, base branch and tracker location.
//!
//! The [`Strategy`] in [`DispatcherConfig`] selects how each value is found:
//! `fixed` takes everything from configuration, `auto` discovers the tracker,
//! reads the agent from it and asks the repository for the base branch.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::lock::is_claim_branch;
use crate::io::config::{DispatcherConfig, Strategy};
use crate::io::git::Git;
use crate::io::process::CommandRunner;
use crate::io::tracker_store::{TRACKER_FILE_NAME, TrackerLocation};
use crate::tracker::Tracker;

/// Agent used when neither the tracker nor the config names one.
pub const DEFAULT_AGENT_NAME: &str = "agent";
/// Base branch used when the repository gives no answer.
pub const FALLBACK_BASE_BRANCH: &str = "main";
/// Shared tracker directory tried after the agent-specific one.
pub const SHARED_TRACKER_DIR: &str = ".agents";

/// Tracker location implied by the configuration.
pub fn tracker_location(cfg: &DispatcherConfig) -> TrackerLocation {
    match cfg.strategy {
        Strategy::Fixed => {
            let path = match (&cfg.tracker_path, &cfg.agent_name) {
                (Some(path), _) => path.clone(),
                (None, Some(agent)) => agent_tracker_path(agent),
                (None, None) => agent_tracker_path(DEFAULT_AGENT_NAME),
            };
            TrackerLocation::Fixed(path)
        }
        Strategy::Auto => {
            let mut candidates = Vec::new();
            if let Some(path) = &cfg.tracker_path {
                candidates.push(path.clone());
            }
            if cfg.tracker_candidates.is_empty() {
                if let Some(agent) = &cfg.agent_name {
                    candidates.push(agent_tracker_path(agent));
                }
                candidates.push(PathBuf::from(SHARED_TRACKER_DIR).join(TRACKER_FILE_NAME));
            } else {
                candidates.extend(cfg.tracker_candidates.iter().cloned());
            }
            let mut seen = HashSet::new();
            candidates.retain(|path| seen.insert(path.clone()));
            TrackerLocation::Discover { candidates }
        }
    }
}

/// Lock namespace for this run.
pub fn resolve_agent(cfg: &DispatcherConfig, tracker: Option<&Tracker>) -> String {
    let from_tracker = tracker.and_then(|tracker| tracker.agent_name.as_deref());
    let agent = match cfg.strategy {
        Strategy::Fixed => cfg.agent_name.as_deref(),
        Strategy::Auto => from_tracker.or(cfg.agent_name.as_deref()),
    };
    agent.unwrap_or(DEFAULT_AGENT_NAME).to_string()
}

/// Base line of development for claim branches.
///
/// `auto` order: configured value, current branch (unless detached or a
/// claim branch of `agent`), the remote's default branch, then `main`.
pub fn resolve_base_branch<R: CommandRunner>(
    cfg: &DispatcherConfig,
    git: &Git<R>,
    agent: &str,
) -> Result<String> {
    if let Some(base) = &cfg.base_branch {
        return Ok(base.clone());
    }
    if cfg.strategy == Strategy::Fixed {
        return Err(anyhow!("strategy 'fixed' requires base_branch"));
    }
    if let Some(current) = git.current_branch()? {
        if !is_claim_branch(agent, &current) {
            debug!(branch = %current, "base branch from current branch");
            return Ok(current);
        }
        debug!(branch = %current, "current branch is a claim branch, ignoring");
    }
    if let Some(default) = git.remote_default_branch(&cfg.remote)? {
        debug!(branch = %default, "base branch from remote default");
        return Ok(default);
    }
    debug!("base branch fallback");
    Ok(FALLBACK_BASE_BRANCH.to_string())
}

fn agent_tracker_path(agent: &str) -> PathBuf {
    PathBuf::from(format!(".{agent}")).join(TRACKER_FILE_NAME)
}
