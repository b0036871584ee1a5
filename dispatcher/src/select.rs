//! Selection helpers for `dispatcher select` and `dispatcher dispatch`.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::selector::{Selection, select_task};
use crate::io::config::DispatcherConfig;
use crate::io::tracker_store::{load_tracker, locate_tracker};
use crate::resolve::tracker_location;
use crate::tracker::{Task, Tracker};

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// No phase matches `current_phase`; the queue is idle.
    AllPhasesComplete,
    /// Current phase has nothing pending; wait for it to be advanced.
    PhaseExhausted { phase: String },
    /// Task ready to be claimed.
    Ready(SelectedTask),
    /// First pending task hit the attempts cap.
    AttemptsExhausted(SelectedTask),
}

/// Selected task metadata carried into locking and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTask {
    pub id: String,
    pub title: String,
    pub phase: String,
    pub attempts: u32,
    pub spec_ref: Option<String>,
}

impl SelectedTask {
    fn from_task(task: &Task, phase: &str) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            phase: phase.to_string(),
            attempts: task.attempts,
            spec_ref: task.spec_ref.clone(),
        }
    }
}

/// The circuit breaker tripped: automation stops until a human looks at the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptsExhausted {
    pub task_id: String,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl fmt::Display for AttemptsExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} has failed {} times (limit {}); manual intervention required",
            self.task_id, self.attempts, self.max_attempts
        )
    }
}

impl std::error::Error for AttemptsExhausted {}

impl AttemptsExhausted {
    pub fn new(task: &SelectedTask, max_attempts: u32) -> Self {
        Self {
            task_id: task.id.clone(),
            attempts: task.attempts,
            max_attempts,
        }
    }
}

/// Tracker together with the path it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedTracker {
    pub path: PathBuf,
    pub tracker: Tracker,
}

/// Select the next task from an in-memory tracker.
pub fn select_next(tracker: &Tracker, max_attempts: u32) -> SelectOutcome {
    let current = tracker.current_phase.as_deref().unwrap_or_default();
    match select_task(tracker, max_attempts) {
        Selection::AllPhasesComplete => SelectOutcome::AllPhasesComplete,
        Selection::PhaseExhausted { phase } => SelectOutcome::PhaseExhausted {
            phase: phase.name.clone(),
        },
        Selection::Ready(task) => SelectOutcome::Ready(SelectedTask::from_task(task, current)),
        Selection::AttemptsExhausted(task) => {
            SelectOutcome::AttemptsExhausted(SelectedTask::from_task(task, current))
        }
    }
}

/// Locate and load the tracker the configuration points at.
pub fn load_configured_tracker(root: &Path, cfg: &DispatcherConfig) -> Result<LoadedTracker> {
    let path = locate_tracker(root, &tracker_location(cfg))?;
    let tracker = load_tracker(&path).with_context(|| "load tracker for selection")?;
    Ok(LoadedTracker { path, tracker })
}
