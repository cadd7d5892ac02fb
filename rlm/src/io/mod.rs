//! I/O helpers for sessions and CLI commands.

pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod transcript;
