//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::tracker::Tracker;

/// Check semantic invariants not expressible in JSON Schema:
/// - No duplicate task ids across the document
/// - No duplicate phase names
/// - Ids and phase names are non-empty
pub fn validate_invariants(tracker: &Tracker) -> Vec<String> {
    let mut errors = Vec::new();
    let mut phase_names = HashSet::new();
    let mut task_ids = HashSet::new();

    for phase in &tracker.phases {
        if phase.name.trim().is_empty() {
            errors.push("phase name must be non-empty".to_string());
        }
        if !phase_names.insert(phase.name.as_str()) {
            errors.push(format!("duplicate phase name '{}'", phase.name));
        }
        for task in &phase.tasks {
            let path = format!("{}/{}", phase.name, task.id);
            if task.id.trim().is_empty() {
                errors.push(format!("{}: task id must be non-empty", phase.name));
            }
            if !task_ids.insert(task.id.as_str()) {
                errors.push(format!("duplicate task id '{}' at {}", task.id, path));
            }
        }
    }

    errors
}

/// Report `depends_on` entries that name no task in the document.
///
/// Dependencies are informational; selection never consults them.
pub fn unknown_dependencies(tracker: &Tracker) -> Vec<String> {
    let ids: HashSet<&str> = tracker.tasks().map(|task| task.id.as_str()).collect();
    let mut errors = Vec::new();
    for task in tracker.tasks() {
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                ));
            }
        }
    }
    errors
}
