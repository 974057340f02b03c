//! The cycle engine: drives goals through the role chain.
//!
//! Per goal: resume from the latest snapshot (or start fresh), then run up to
//! `max_cycles` attempts. Each attempt resets the transient state, runs every
//! role until one aborts, restores the working tree if the change was not
//! accepted, records a snapshot and a learning entry, and then decides:
//! accepted → mark the goal done; aborted → give up on the goal for this run;
//! otherwise retry.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, info_span, warn};

use crate::core::types::{AbortReason, CycleState, Goal};
use crate::io::config::EngineConfig;
use crate::io::goal_store::GoalStore;
use crate::io::learning_log::{LearningEntry, LearningLog};
use crate::io::model::build_model_client;
use crate::io::patch::{GitPatchApplier, PatchApplier};
use crate::io::prompt::PromptRenderer;
use crate::io::snapshot_store::SnapshotStore;
use crate::io::test_runner::CommandTestRunner;
use crate::roles::goal_generation::{GoalSynthesizer, ModelGoalSynthesizer};
use crate::roles::registry::RoleRegistry;
use crate::roles::{RoleChain, RoleDeps};

/// How one goal left the attempt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalOutcome {
    /// An attempt was accepted and the goal marked completed.
    Completed,
    /// A role aborted; the goal stays pending for a future run.
    Aborted,
    /// `max_cycles` attempts ran without acceptance or abort.
    Exhausted,
}

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No pending goals and no synthesis configured (or it already ran).
    #[default]
    QueueExhausted,
    /// Synthesis ran on an empty queue and produced nothing usable.
    NothingGenerated,
}

/// Summary of one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    pub goals_processed: usize,
    pub goals_completed: usize,
    pub goals_aborted: usize,
    pub goals_exhausted: usize,
    /// Role-chain executions across all goals.
    pub attempts: u32,
    pub goals_generated: usize,
    pub stop: StopReason,
}

/// Everything the engine needs, assembled by the caller.
pub struct EngineParts {
    pub goals: GoalStore,
    pub snapshots: SnapshotStore,
    pub learning: LearningLog,
    pub chain: RoleChain,
    pub patcher: Rc<dyn PatchApplier>,
    pub synthesizer: Option<Box<dyn GoalSynthesizer>>,
    pub code_dir: PathBuf,
    pub max_cycles: u32,
}

pub struct CycleEngine {
    goals: GoalStore,
    snapshots: SnapshotStore,
    learning: LearningLog,
    chain: RoleChain,
    patcher: Rc<dyn PatchApplier>,
    synthesizer: Option<Box<dyn GoalSynthesizer>>,
    code_dir: PathBuf,
    max_cycles: u32,
}

impl CycleEngine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            goals: parts.goals,
            snapshots: parts.snapshots,
            learning: parts.learning,
            chain: parts.chain,
            patcher: parts.patcher,
            synthesizer: parts.synthesizer,
            code_dir: parts.code_dir,
            max_cycles: parts.max_cycles,
        }
    }

    /// Assemble the production engine from configuration.
    ///
    /// Every failure here is a configuration/startup error: nothing has run yet.
    pub fn from_config(cfg: &EngineConfig, base_dir: &Path, registry: &RoleRegistry) -> Result<Self> {
        cfg.validate()?;
        let paths = cfg.paths(base_dir);
        if !paths.code_dir.is_dir() {
            return Err(anyhow!(
                "engine.code_dir {} is not a directory",
                paths.code_dir.display()
            ));
        }
        let prompts = Rc::new(PromptRenderer::load(paths.prompts_dir.as_deref())?);
        let model = build_model_client(&cfg.model, &paths.code_dir).context("model client")?;
        let patcher: Rc<dyn PatchApplier> = Rc::new(GitPatchApplier::new());
        let learning = LearningLog::in_memory_dir(&paths.memory_dir);
        let deps = RoleDeps {
            config: Rc::new(cfg.clone()),
            code_dir: paths.code_dir.clone(),
            model,
            patcher: Rc::clone(&patcher),
            tests: Rc::new(CommandTestRunner::from_config(&cfg.verify)),
            prompts,
            learning: learning.clone(),
        };
        let chain = registry.build_chain(&cfg.roles, &deps)?;
        let synthesizer = cfg
            .engine
            .autonomous_goals
            .then(|| Box::new(ModelGoalSynthesizer::new(&deps)) as Box<dyn GoalSynthesizer>);

        Ok(Self::new(EngineParts {
            goals: GoalStore::load(&paths.goals_path),
            snapshots: SnapshotStore::new(&paths.memory_dir),
            learning,
            chain,
            patcher,
            synthesizer,
            code_dir: paths.code_dir,
            max_cycles: cfg.engine.max_cycles,
        }))
    }

    pub fn goals(&self) -> &GoalStore {
        &self.goals
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Process goals until the queue is drained.
    pub fn run(&mut self) -> EngineReport {
        let mut report = EngineReport::default();
        let mut synthesis_attempted = false;
        info!(
            pending = self.goals.pending_count(),
            roles = ?self.chain.names(),
            max_cycles = self.max_cycles,
            "engine starting"
        );
        loop {
            let Some(goal) = self.goals.next_goal() else {
                if !synthesis_attempted && self.synthesizer.is_some() {
                    synthesis_attempted = true;
                    let added = self.synthesize_goals();
                    report.goals_generated += added;
                    if added > 0 {
                        continue;
                    }
                    report.stop = StopReason::NothingGenerated;
                } else {
                    report.stop = StopReason::QueueExhausted;
                }
                break;
            };

            let (outcome, attempts) = self.run_goal(&goal);
            report.goals_processed += 1;
            report.attempts += attempts;
            match outcome {
                GoalOutcome::Completed => report.goals_completed += 1,
                GoalOutcome::Aborted => report.goals_aborted += 1,
                GoalOutcome::Exhausted => report.goals_exhausted += 1,
            }
        }
        info!(
            processed = report.goals_processed,
            completed = report.goals_completed,
            aborted = report.goals_aborted,
            exhausted = report.goals_exhausted,
            stop = ?report.stop,
            "engine finished"
        );
        report
    }

    /// Run the attempt loop for one goal. Returns the outcome and the number
    /// of attempts executed.
    pub fn run_goal(&mut self, goal: &Goal) -> (GoalOutcome, u32) {
        let _span = info_span!("goal", goal_id = %goal.id).entered();
        let mut state = match self.snapshots.resume(goal, &self.code_dir) {
            Some(state) => {
                info!(
                    last_attempt = state.metadata.attempt,
                    todos = state.todos.len(),
                    "resuming from snapshot"
                );
                state
            }
            None => {
                info!(description = %goal.description, "starting goal");
                CycleState::new(&self.code_dir, goal.clone())
            }
        };
        let base_attempt = state.metadata.attempt;

        for k in 1..=self.max_cycles {
            let attempt = base_attempt + k;
            let _attempt_span = info_span!("attempt", attempt).entered();
            state.begin_attempt(attempt, Utc::now().to_rfc3339());

            self.run_chain(&mut state);
            self.settle_worktree(&mut state);

            self.snapshots.record(&state);
            if let Err(err) = self.learning.append(&LearningEntry::from_state(&state)) {
                warn!(err = %format!("{err:#}"), "learning log write failed");
            }

            if state.accepted {
                if let Err(err) = self.goals.mark_done(&goal.id) {
                    error!(err = %format!("{err:#}"), "could not persist goal completion");
                }
                info!("attempt accepted");
                return (GoalOutcome::Completed, k);
            }
            if state.should_abort {
                info!(reason = ?state.metadata.errors.last(), "goal aborted for this run");
                return (GoalOutcome::Aborted, k);
            }
            info!("attempt neither accepted nor aborted, retrying");
        }
        warn!(max_cycles = self.max_cycles, "attempts exhausted, goal stays pending");
        (GoalOutcome::Exhausted, self.max_cycles)
    }

    /// Run each role in order, stopping at the first abort. Panics inside a
    /// role are converted to an internal abort.
    fn run_chain(&self, state: &mut CycleState) {
        for role in self.chain.roles() {
            let name = role.name();
            let errors_before = state.metadata.errors.len();
            let result = catch_unwind(AssertUnwindSafe(|| role.run(state)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => state.abort(name, &reason),
                Err(payload) => {
                    let reason = AbortReason::Internal(panic_message(payload.as_ref()));
                    error!(role = name, %reason, "role panicked");
                    state.abort(name, &reason);
                }
            }
            if state.should_abort {
                if state.metadata.errors.len() == errors_before {
                    state.abort(name, &AbortReason::Internal("aborted without a reason".to_string()));
                }
                warn!(role = name, reason = ?state.metadata.errors.last(), "role aborted attempt");
                break;
            }
            info!(role = name, "role finished");
        }
    }

    /// Close out the attempt's edits: keep them when accepted, otherwise undo
    /// any patch that no role reverted. Later attempts then only ever revert
    /// their own patches.
    fn settle_worktree(&self, state: &mut CycleState) {
        if state.accepted {
            if let Err(err) = self.patcher.keep(&state.code_dir) {
                error!(err = %format!("{err:#}"), "could not keep accepted patch");
            }
            return;
        }
        if !state.metadata.worktree_dirty {
            return;
        }
        warn!("attempt ended with an unaccepted patch applied, reverting");
        match self.patcher.revert_all(&state.code_dir) {
            Ok(()) => state.metadata.worktree_dirty = false,
            Err(err) => {
                error!(err = %format!("{err:#}"), "revert failed; working tree may be modified");
                state.metadata.errors.push(format!(
                    "attempt {}: engine: revert failed: {err:#}",
                    state.metadata.attempt
                ));
            }
        }
    }

    /// Ask the synthesizer for goals and append the usable ones. Returns how
    /// many were added.
    fn synthesize_goals(&mut self) -> usize {
        let Some(synthesizer) = &self.synthesizer else {
            return 0;
        };
        info!("goal queue empty, synthesizing goals");
        let proposed = match synthesizer.synthesize(self.goals.goals()) {
            Ok(goals) => goals,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "goal synthesis failed");
                return 0;
            }
        };
        let mut added = 0;
        for goal in proposed {
            let id = goal.id.clone();
            match self.goals.add_goal(goal) {
                Ok(()) => {
                    info!(goal_id = %id, "generated goal added");
                    added += 1;
                }
                Err(err) => warn!(goal_id = %id, err = %format!("{err:#}"), "generated goal discarded"),
            }
        }
        added
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("role panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("role panicked: {msg}")
    } else {
        "role panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ModelProvider;
    use crate::test_support::write_file;

    #[test]
    fn panic_payloads_become_messages() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("index out of bounds"));
        let borrowed: Box<dyn Any + Send> = Box::new("boom");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "role panicked: index out of bounds");
        assert_eq!(panic_message(borrowed.as_ref()), "role panicked: boom");
        assert_eq!(panic_message(other.as_ref()), "role panicked");
    }

    #[test]
    fn from_config_rejects_missing_code_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = EngineConfig::default();
        cfg.engine.code_dir = PathBuf::from("does-not-exist");
        let err = CycleEngine::from_config(&cfg, temp.path(), &RoleRegistry::builtin())
            .err()
            .expect("missing code dir");
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn from_config_rejects_unknown_role() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_file(temp.path(), "src/lib.rs", "pub fn a() {}\n");
        let mut cfg = EngineConfig::default();
        cfg.model.provider = ModelProvider::Command;
        cfg.model.command = vec!["cat".to_string()];
        cfg.roles = vec!["identify".to_string(), "polish".to_string()];
        let err = CycleEngine::from_config(&cfg, temp.path(), &RoleRegistry::builtin())
            .err()
            .expect("unknown role");
        assert!(format!("{err:#}").contains("unknown role 'polish'"));
    }
}
