//! Stable exit codes for dispatcher CLI commands.
//!
//! Coordination states (idle, waiting, locked) are not failures: a periodic
//! scheduler simply runs the dispatcher again later.

/// Command succeeded, or the run ended in a normal coordination state.
pub const OK: i32 = 0;
/// Missing or malformed tracker, attempts exhausted, invalid configuration,
/// or a failed version-control command.
pub const FAILURE: i32 = 1;
