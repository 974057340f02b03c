//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod metrics;
pub mod patch;
pub mod response;
pub mod review;
pub mod todo;
pub mod types;
