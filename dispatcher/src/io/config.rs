//! Dispatcher configuration stored in `dispatcher.toml` at the repository root.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::selector::DEFAULT_MAX_ATTEMPTS;

pub const CONFIG_FILE_NAME: &str = "dispatcher.toml";
pub const DEFAULT_RULES_DIR: &str = ".agents/rules/";
pub const DEFAULT_REMOTE: &str = "origin";

/// How agent identity, base branch and tracker location are resolved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Everything comes from configuration; nothing is discovered.
    Fixed,
    /// Tracker is discovered, agent comes from the tracker, base branch from
    /// the repository.
    #[default]
    Auto,
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "fixed" => Ok(Strategy::Fixed),
            "auto" => Ok(Strategy::Auto),
            other => Err(anyhow!("unknown strategy '{other}' (expected fixed or auto)")),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Fixed => f.write_str("fixed"),
            Strategy::Auto => f.write_str("auto"),
        }
    }
}

/// Dispatcher configuration (TOML).
///
/// Missing fields default to the values a scheduled dispatcher needs. The
/// struct is passed to the dispatcher at construction; nothing reads it from
/// process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub strategy: Strategy,

    /// Lock namespace. Required for `fixed`; for `auto` the tracker's
    /// `agent_name` wins when present.
    pub agent_name: Option<String>,

    /// Line of development claim branches start from. Required for `fixed`.
    pub base_branch: Option<String>,

    /// Tracker location relative to the repository root (`fixed` only).
    /// Defaults to `.<agent_name>/tracker.json`.
    pub tracker_path: Option<PathBuf>,

    /// Ordered tracker candidates tried before the hidden-directory scan (`auto` only).
    pub tracker_candidates: Vec<PathBuf>,

    /// Rules directory advertised to the worker in the task package.
    pub rules_dir: String,

    /// Remote that holds the claim branches.
    pub remote: String,

    /// Attempts at which a pending task needs manual intervention.
    pub max_attempts: u32,

    /// Wall-clock limit for each external command.
    pub command_timeout_secs: u64,

    /// Keep at most this many bytes of each command's stdout/stderr.
    pub output_limit_bytes: usize,

    /// Push the claim branch after creating it.
    pub push_claim: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            agent_name: None,
            base_branch: None,
            tracker_path: None,
            tracker_candidates: Vec::new(),
            rules_dir: DEFAULT_RULES_DIR.to_string(),
            remote: DEFAULT_REMOTE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
            push_claim: false,
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub strategy: Option<Strategy>,
    pub agent_name: Option<String>,
    pub base_branch: Option<String>,
    pub tracker_path: Option<PathBuf>,
    pub remote: Option<String>,
    pub push_claim: bool,
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must be non-empty"));
        }
        if self.rules_dir.trim().is_empty() {
            return Err(anyhow!("rules_dir must be non-empty"));
        }
        if let Some(agent) = &self.agent_name
            && agent.trim().is_empty()
        {
            return Err(anyhow!("agent_name must be non-empty when set"));
        }
        if let Some(base) = &self.base_branch
            && base.trim().is_empty()
        {
            return Err(anyhow!("base_branch must be non-empty when set"));
        }
        if self.strategy == Strategy::Fixed {
            if self.agent_name.is_none() {
                return Err(anyhow!("strategy 'fixed' requires agent_name"));
            }
            if self.base_branch.is_none() {
                return Err(anyhow!("strategy 'fixed' requires base_branch"));
            }
        }
        Ok(())
    }

    /// Apply command-line overrides on top of file values.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(agent) = &overrides.agent_name {
            self.agent_name = Some(agent.clone());
        }
        if let Some(base) = &overrides.base_branch {
            self.base_branch = Some(base.clone());
        }
        if let Some(path) = &overrides.tracker_path {
            self.tracker_path = Some(path.clone());
        }
        if let Some(remote) = &overrides.remote {
            self.remote = remote.clone();
        }
        if overrides.push_claim {
            self.push_claim = true;
        }
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DispatcherConfig::default()`. The result
/// is not validated; call [`DispatcherConfig::validate`] once overrides are
/// applied.
pub fn load_config(path: &Path) -> Result<DispatcherConfig> {
    if !path.exists() {
        return Ok(DispatcherConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DispatcherConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Load, override and validate: the configuration a run actually uses.
pub fn resolve_config(path: &Path, overrides: &ConfigOverrides) -> Result<DispatcherConfig> {
    let cfg = load_config(path)?.with_overrides(overrides);
    cfg.validate()
        .with_context(|| format!("invalid configuration ({})", path.display()))?;
    Ok(cfg)
}
