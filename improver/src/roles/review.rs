//! Review: decide whether the applied patch is kept, reverting it otherwise.

use std::rc::Rc;

use tracing::{error, info, warn};

use super::{Role, RoleDeps};
use crate::core::review::{Verdict, acceptance, parse_verdict};
use crate::core::types::{AbortReason, CycleState};
use crate::io::model::ModelClient;
use crate::io::patch::PatchApplier;
use crate::io::prompt::{PromptRenderer, ReviewPrompt};

pub struct ReviewRole {
    model: Rc<dyn ModelClient>,
    model_name: String,
    prompts: Rc<PromptRenderer>,
    patcher: Rc<dyn PatchApplier>,
    require_model_approval: bool,
}

impl ReviewRole {
    pub fn new(deps: &RoleDeps) -> Self {
        Self {
            model: Rc::clone(&deps.model),
            model_name: deps.model_name().to_string(),
            prompts: Rc::clone(&deps.prompts),
            patcher: Rc::clone(&deps.patcher),
            require_model_approval: deps.config.review.require_model_approval,
        }
    }

    /// Ask the model for a verdict. `Err` carries a rejection reason.
    fn request_verdict(&self, state: &CycleState, patch: &str) -> Result<Verdict, String> {
        let (summary, output) = match &state.test_results {
            Some(t) => (t.summary(), format!("{}{}", t.stdout, t.stderr)),
            None => ("not run".to_string(), String::new()),
        };
        let prompt = self
            .prompts
            .review(&ReviewPrompt {
                goal: &state.goal,
                todos: &state.todos,
                patch,
                test_summary: &summary,
                test_output: &output,
            })
            .map_err(|e| format!("render review prompt: {e:#}"))?;
        let response = self
            .model
            .call(&self.model_name, &prompt, None)
            .map_err(|e| format!("review model call failed: {e}"))?;
        parse_verdict(&response).map_err(|e| format!("unreadable review verdict: {e:#}"))
    }

    fn reject(&self, state: &mut CycleState, reason: String) -> Result<(), AbortReason> {
        info!(%reason, "change rejected, reverting");
        state.accepted = false;
        state.review = Some(reason.clone());
        match self.patcher.revert_all(&state.code_dir) {
            Ok(()) => {
                state.metadata.worktree_dirty = false;
                Err(AbortReason::Rejected(reason))
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "revert failed");
                Err(AbortReason::Rejected(format!("{reason}; revert failed: {err:#}")))
            }
        }
    }
}

impl Role for ReviewRole {
    fn name(&self) -> &str {
        "review"
    }

    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason> {
        if state.should_abort {
            return Ok(());
        }
        let Some(patch) = state.patch.clone() else {
            info!("no patch, skipping review");
            return Ok(());
        };

        let tests_passed = state.test_results.as_ref().is_some_and(|t| t.passed);
        let verdict = if tests_passed && self.require_model_approval {
            match self.request_verdict(state, &patch) {
                Ok(verdict) => Some(verdict),
                Err(reason) => {
                    warn!(%reason, "no usable review verdict");
                    return self.reject(state, reason);
                }
            }
        } else {
            None
        };

        match acceptance(
            state.test_results.as_ref(),
            verdict.as_ref(),
            self.require_model_approval,
        ) {
            Ok(()) => {
                state.accepted = true;
                state.metadata.worktree_dirty = false;
                state.review = Some(
                    verdict
                        .map(|v| v.feedback)
                        .filter(|f| !f.trim().is_empty())
                        .unwrap_or_else(|| "accepted".to_string()),
                );
                info!("change accepted");
                Ok(())
            }
            Err(reason) => self.reject(state, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Goal, TestResults};
    use crate::io::model::ModelCallError;
    use crate::test_support::{FakePatchApplier, RoleDepsBuilder, ScriptedModel};

    fn state(root: &std::path::Path, passed: bool) -> CycleState {
        let mut state = CycleState::new(root, Goal::new("g1", "add function foo"));
        state.patch = Some("--- a/x\n+++ b/x\n".to_string());
        state.metadata.worktree_dirty = true;
        state.test_results = Some(TestResults {
            passed,
            exit_code: Some(if passed { 0 } else { 101 }),
            ..TestResults::default()
        });
        state
    }

    #[test]
    fn accepts_when_tests_pass_and_model_approves() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new([Ok(
            r#"{"patch_accepted": true, "feedback": "looks right"}"#.to_string(),
        )]);
        let patcher = FakePatchApplier::new();
        let deps = RoleDepsBuilder::new(temp.path())
            .model(model)
            .patcher(patcher.clone())
            .build();

        let mut state = state(temp.path(), true);
        ReviewRole::new(&deps).run(&mut state).expect("run");
        assert!(state.accepted);
        assert!(!state.metadata.worktree_dirty);
        assert_eq!(state.review.as_deref(), Some("looks right"));
        assert_eq!(patcher.reverts(), 0);
    }

    #[test]
    fn failed_tests_reject_without_model_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new([]);
        let patcher = FakePatchApplier::new();
        let deps = RoleDepsBuilder::new(temp.path())
            .model(model.clone())
            .patcher(patcher.clone())
            .build();

        let mut state = state(temp.path(), false);
        let err = ReviewRole::new(&deps).run(&mut state).unwrap_err();
        assert_eq!(
            err,
            AbortReason::Rejected("tests failed (exit code 101)".to_string())
        );
        assert!(!state.accepted);
        assert_eq!(patcher.reverts(), 1);
        assert!(model.prompts().is_empty());
        assert!(!state.metadata.worktree_dirty);
    }

    #[test]
    fn model_decline_rejects_and_reverts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new([Ok(
            r#"{"patch_accepted": false, "feedback": "unrelated edits"}"#.to_string(),
        )]);
        let patcher = FakePatchApplier::new();
        let deps = RoleDepsBuilder::new(temp.path())
            .model(model)
            .patcher(patcher.clone())
            .build();

        let mut state = state(temp.path(), true);
        let err = ReviewRole::new(&deps).run(&mut state).unwrap_err();
        assert!(matches!(err, AbortReason::Rejected(msg) if msg.contains("unrelated edits")));
        assert_eq!(patcher.reverts(), 1);
    }

    #[test]
    fn model_failure_rejects() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new([Err(ModelCallError::Timeout(30))]);
        let patcher = FakePatchApplier::new();
        let deps = RoleDepsBuilder::new(temp.path())
            .model(model)
            .patcher(patcher.clone())
            .build();

        let mut state = state(temp.path(), true);
        assert!(ReviewRole::new(&deps).run(&mut state).is_err());
        assert!(!state.accepted);
        assert_eq!(patcher.reverts(), 1);
    }

    #[test]
    fn approval_can_be_waived() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new([]);
        let mut deps = RoleDepsBuilder::new(temp.path()).model(model.clone()).build();
        Rc::make_mut(&mut deps.config).review.require_model_approval = false;

        let mut state = state(temp.path(), true);
        ReviewRole::new(&deps).run(&mut state).expect("run");
        assert!(state.accepted);
        assert!(model.prompts().is_empty());
    }
}
