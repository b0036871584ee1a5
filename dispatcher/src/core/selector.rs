//! Deterministic task selection over the tracker.

use crate::tracker::{Phase, Task, Tracker};

/// Attempts at which a pending task stops being dispatched automatically.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Result of scanning the tracker for the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    /// No phase carries the `current_phase` name.
    AllPhasesComplete,
    /// The current phase has no pending task left.
    PhaseExhausted { phase: &'a Phase },
    /// First pending task of the current phase.
    Ready(&'a Task),
    /// First pending task has used up its attempts.
    AttemptsExhausted(&'a Task),
}

/// Pick the next task: first `pending` task of the current phase, in
/// declared order.
///
/// The attempts breaker applies to that first match only; later pending tasks
/// are never considered in its place.
pub fn select_task(tracker: &Tracker, max_attempts: u32) -> Selection<'_> {
    let Some(phase) = tracker.current_phase() else {
        return Selection::AllPhasesComplete;
    };
    match first_pending(phase) {
        None => Selection::PhaseExhausted { phase },
        Some(task) if is_exhausted(task, max_attempts) => Selection::AttemptsExhausted(task),
        Some(task) => Selection::Ready(task),
    }
}

/// First task with status `pending` in declared order.
pub fn first_pending(phase: &Phase) -> Option<&Task> {
    phase.tasks.iter().find(|task| task.status.is_pending())
}

/// Returns true if a task has reached the attempts cap.
pub fn is_exhausted(task: &Task, max_attempts: u32) -> bool {
    task.attempts >= max_attempts
}
