//! I/O adapters: persistence, subprocesses, and external collaborators.

pub mod atomic;
pub mod config;
pub mod git;
pub mod goal_store;
pub mod init;
pub mod learning_log;
pub mod model;
pub mod patch;
pub mod process;
pub mod prompt;
pub mod snapshot_store;
pub mod test_runner;
pub mod workspace;
