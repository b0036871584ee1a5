//! I/O helpers for dispatcher commands.

pub mod config;
pub mod git;
pub mod process;
pub mod tracker_store;
