//! Branch-locked task dispatcher.
//!
//! Reads a shared task tracker, picks the next pending task of the current
//! phase and claims it by creating `<agent>/task-<id>`. The existence of that
//! branch on the shared remote is the lock; there is no lock server.
//!
//! - **[`core`]**: Pure, deterministic logic (selection, invariants, lock naming).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, tracker files, git, processes).
//!
//! Orchestration modules ([`select`], [`lock`], [`dispatch`], [`status`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod lock;
pub mod logging;
pub mod resolve;
pub mod select;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tracker;
