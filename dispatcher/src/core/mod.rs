//! Deterministic, pure logic shared by the dispatcher.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod lock;
pub mod selector;
