//! Tracker discovery and loading with schema + invariant validation.
//!
//! The dispatcher never writes the tracker; CI and humans own its mutations.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_invariants;
use crate::tracker::Tracker;

pub const TRACKER_FILE_NAME: &str = "tracker.json";

const TRACKER_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/tracker.schema.json"
));

/// Where to look for the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerLocation {
    /// Exactly this path (relative paths resolve against the repository root).
    Fixed(PathBuf),
    /// Try `candidates` in order, then `.*/tracker.json` in hidden top-level
    /// directories sorted by name.
    Discover { candidates: Vec<PathBuf> },
}

/// No tracker at any searched location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerNotFound {
    pub searched: Vec<PathBuf>,
}

impl fmt::Display for TrackerNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.searched.is_empty() {
            return write!(f, "tracker not found (no candidate locations)");
        }
        let searched: Vec<String> = self
            .searched
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        write!(f, "tracker not found (searched: {})", searched.join(", "))
    }
}

impl std::error::Error for TrackerNotFound {}

/// Tracker exists but cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedTracker {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for MalformedTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed tracker {}: {}", self.path.display(), self.reason)
    }
}

impl std::error::Error for MalformedTracker {}

/// Resolve the tracker path once, returning the first existing match.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn locate_tracker(root: &Path, location: &TrackerLocation) -> Result<PathBuf> {
    let mut searched = Vec::new();
    match location {
        TrackerLocation::Fixed(path) => {
            let candidate = root.join(path);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "tracker found at fixed path");
                return Ok(candidate);
            }
            searched.push(candidate);
        }
        TrackerLocation::Discover { candidates } => {
            for path in candidates {
                let candidate = root.join(path);
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "tracker found at candidate");
                    return Ok(candidate);
                }
                searched.push(candidate);
            }
            for dir in hidden_dirs(root)? {
                let candidate = dir.join(TRACKER_FILE_NAME);
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "tracker discovered");
                    return Ok(candidate);
                }
            }
            searched.push(root.join(".*").join(TRACKER_FILE_NAME));
        }
    }
    Err(TrackerNotFound { searched }.into())
}

/// Hidden top-level directories (excluding `.git`), sorted by name.
fn hidden_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read dir {}", root.display())),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry in {}", root.display()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with('.') || name == ".git" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Load and validate the tracker (schema + invariants).
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_tracker(path: &Path) -> Result<Tracker> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tracker {}", path.display()))?;
    parse_tracker(path, &contents)
}

/// Parse tracker text; every failure is reported as [`MalformedTracker`].
pub fn parse_tracker(path: &Path, contents: &str) -> Result<Tracker> {
    let malformed = |reason: String| MalformedTracker {
        path: path.to_path_buf(),
        reason,
    };
    let value: Value =
        serde_json::from_str(contents).map_err(|err| malformed(format!("invalid json: {err}")))?;
    validate_schema(&value).map_err(malformed)?;
    let tracker: Tracker = serde_json::from_value(value)
        .map_err(|err| malformed(format!("unexpected shape: {err}")))?;
    let errors = validate_invariants(&tracker);
    if !errors.is_empty() {
        return Err(malformed(format!("invariants failed: {}", errors.join("; "))).into());
    }
    debug!(phases = tracker.phases.len(), "tracker loaded");
    Ok(tracker)
}

fn validate_schema(tracker: &Value) -> std::result::Result<(), String> {
    let schema: Value =
        serde_json::from_str(TRACKER_SCHEMA).map_err(|err| format!("invalid schema: {err}"))?;
    let compiled = validator_for(&schema).map_err(|err| format!("invalid schema: {err}"))?;
    if compiled.is_valid(tracker) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(tracker)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(format!("schema validation failed: {}", messages.join("; ")))
}
