//! Deterministic, pure logic shared by the session loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod protocol;
pub mod truncate;
pub mod types;
