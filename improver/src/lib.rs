//! Autonomous self-improvement cycle engine.
//!
//! The engine takes goals from a persistent queue and drives each one through
//! a configurable chain of roles (identify → refine → verify → review) that
//! ask a language model for changes, apply them to a working tree, run the
//! project's tests and keep or revert the result. Every attempt is
//! snapshotted so interrupted work resumes, and every outcome is appended to a
//! learning log that later prompts draw on.
//!
//! - **[`core`]**: Pure logic (todo validation, patch extraction, verdicts,
//!   code metrics). No I/O.
//! - **[`io`]**: Side effects (config, stores, git, processes, model calls).
//! - **[`roles`]**: The pipeline stages and the registry that builds chains.
//! - **[`engine`]**: The goal/attempt loop tying it together.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod roles;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
