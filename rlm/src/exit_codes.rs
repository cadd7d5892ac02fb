//! Stable exit codes for `rlm` CLI commands.

/// Command succeeded or the session produced a final answer.
pub const OK: i32 = 0;
/// Command failed due to invalid config, missing credential, transport or other errors.
pub const INVALID: i32 = 1;
/// `rlm ask` ran out of iterations without a final answer.
pub const ITERATIONS_EXHAUSTED: i32 = 2;
/// `rlm ask` was entered past the depth cap.
pub const DEPTH_EXHAUSTED: i32 = 3;
