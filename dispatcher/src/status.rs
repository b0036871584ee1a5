//! Tracker overview for `dispatcher status`.

use std::fmt;

use crate::tracker::{TaskStatus, Tracker};

/// Per-phase task counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub name: String,
    pub current: bool,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub other: usize,
}

impl PhaseSummary {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.other
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    pub project: Option<String>,
    pub current_phase: Option<String>,
    pub phases: Vec<PhaseSummary>,
}

pub fn summarize(tracker: &Tracker) -> TrackerSummary {
    let current = tracker.current_phase.as_deref();
    let phases = tracker
        .phases
        .iter()
        .map(|phase| {
            let mut summary = PhaseSummary {
                name: phase.name.clone(),
                current: Some(phase.name.as_str()) == current,
                ..PhaseSummary::default()
            };
            for task in &phase.tasks {
                match task.status {
                    TaskStatus::Pending => summary.pending += 1,
                    TaskStatus::InProgress => summary.in_progress += 1,
                    TaskStatus::Completed => summary.completed += 1,
                    TaskStatus::Other(_) => summary.other += 1,
                }
            }
            summary
        })
        .collect();
    TrackerSummary {
        project: tracker.project.clone(),
        current_phase: tracker.current_phase.clone(),
        phases,
    }
}

impl fmt::Display for TrackerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            writeln!(f, "project: {project}")?;
        }
        match &self.current_phase {
            Some(phase) if self.phases.iter().any(|p| p.current) => {
                writeln!(f, "current phase: {phase}")?;
            }
            Some(phase) => writeln!(f, "current phase: {phase} (no such phase, idle)")?,
            None => writeln!(f, "current phase: none (idle)")?,
        }
        for phase in &self.phases {
            let marker = if phase.current { "*" } else { " " };
            write!(
                f,
                "{marker} {}: {} tasks, {} pending, {} in progress, {} completed",
                phase.name,
                phase.total(),
                phase.pending,
                phase.in_progress,
                phase.completed
            )?;
            if phase.other > 0 {
                write!(f, ", {} other", phase.other)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
