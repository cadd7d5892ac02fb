//! Recursive language model runner.
//!
//! A model answers a query over a context it never sees directly: each reply
//! may carry a snippet that runs in a persistent execution environment where
//! the context is bound as `context`, and snippets can delegate sub-queries to
//! fresh sessions one level deeper. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (reply parsing, budgets, types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, prompts, model transport,
//!   transcripts). Isolated to enable scripted models in tests.
//!
//! [`session`] drives the loop, [`repl`] hosts snippet execution and
//! `delegate` connects the two for recursive calls.

pub mod core;
mod delegate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod repl;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use session::Rlm;
