//! Verify: run the test suite against the patched tree.

use std::rc::Rc;

use tracing::{info, warn};

use super::{Role, RoleDeps};
use crate::core::types::{AbortReason, CycleState, TestResults};
use crate::io::test_runner::TestRunner;

pub struct VerifyRole {
    tests: Rc<dyn TestRunner>,
}

impl VerifyRole {
    pub fn new(deps: &RoleDeps) -> Self {
        Self {
            tests: Rc::clone(&deps.tests),
        }
    }
}

impl Role for VerifyRole {
    fn name(&self) -> &str {
        "verify"
    }

    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason> {
        if state.should_abort {
            return Ok(());
        }
        if state.patch.is_none() {
            info!("no patch, skipping verify");
            return Ok(());
        }
        match self.tests.run(&state.code_dir) {
            Ok(results) => {
                info!(summary = %results.summary(), "verification finished");
                state.test_results = Some(results);
                Ok(())
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(%message, "test runner unavailable");
                state.test_results = Some(TestResults::infrastructure_failure(message.clone()));
                Err(AbortReason::TestRunnerUnavailable(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Goal;
    use crate::test_support::{RoleDepsBuilder, ScriptedTestRunner};

    fn patched_state(root: &std::path::Path) -> CycleState {
        let mut state = CycleState::new(root, Goal::new("g1", "add function foo"));
        state.patch = Some("--- a/x\n+++ b/x\n".to_string());
        state
    }

    #[test]
    fn records_failing_results_without_aborting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedTestRunner::new([Ok(ScriptedTestRunner::failed("1 test failed"))]);
        let deps = RoleDepsBuilder::new(temp.path()).tests(runner.clone()).build();

        let mut state = patched_state(temp.path());
        VerifyRole::new(&deps).run(&mut state).expect("run");
        assert!(state.test_results.as_ref().is_some_and(|t| !t.passed));
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn missing_runner_aborts_with_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedTestRunner::new([Err("spawn cargo: not found".to_string())]);
        let deps = RoleDepsBuilder::new(temp.path()).tests(runner).build();

        let mut state = patched_state(temp.path());
        let err = VerifyRole::new(&deps).run(&mut state).unwrap_err();
        assert!(matches!(err, AbortReason::TestRunnerUnavailable(msg) if msg.contains("not found")));
        assert!(state.test_results.as_ref().is_some_and(|t| t.error.is_some()));
    }

    #[test]
    fn skips_without_patch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedTestRunner::new([]);
        let deps = RoleDepsBuilder::new(temp.path()).tests(runner.clone()).build();

        let mut state = CycleState::new(temp.path(), Goal::new("g1", "x"));
        VerifyRole::new(&deps).run(&mut state).expect("run");
        assert_eq!(runner.calls(), 0);
        assert!(state.test_results.is_none());
    }
}
