//! Test-suite runner adapter.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use super::config::VerifyConfig;
use super::process::run_command_with_timeout;
use crate::core::types::TestResults;

/// Runs the project's tests.
///
/// `Err` means the runner itself is unusable (e.g. the binary is missing);
/// failing tests are an `Ok` with `passed == false`.
pub trait TestRunner {
    fn run(&self, workdir: &Path) -> Result<TestResults>;
}

/// Runs a configured command (default `cargo test`) in the working directory.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandTestRunner {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &VerifyConfig) -> Self {
        Self::new(
            cfg.command.clone(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn run(&self, workdir: &Path) -> Result<TestResults> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("test command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        info!(command = %self.argv.join(" "), "running tests");

        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run test command '{}'", self.argv.join(" ")))?;

        let results = TestResults {
            passed: output.success(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            error: None,
        };
        if results.passed {
            info!("tests passed");
        } else {
            warn!(summary = %results.summary(), "tests failed");
        }
        Ok(results)
    }
}
