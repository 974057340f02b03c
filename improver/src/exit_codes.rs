//! Stable exit codes for improver CLI commands.

/// Command succeeded; for `run`, the goal queue was drained.
pub const OK: i32 = 0;
/// Configuration or startup failure (bad config, unknown role, missing API key).
pub const INVALID: i32 = 1;
