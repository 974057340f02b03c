//! Refine: todos + current code → patch, applied to the working tree.

use std::rc::Rc;

use tracing::{debug, info, warn};

use super::{Role, RoleDeps};
use crate::core::patch::{extract_patch, touched_files};
use crate::core::types::{AbortReason, CycleState};
use crate::io::learning_log::LearningLog;
use crate::io::model::ModelClient;
use crate::io::patch::PatchApplier;
use crate::io::prompt::{PromptRenderer, RefinePrompt};
use crate::io::workspace::{render_sources, source_files};

/// Earlier abort reasons shown to the model, most recent last.
const PREVIOUS_ERRORS_SHOWN: usize = 5;

pub struct RefineRole {
    model: Rc<dyn ModelClient>,
    model_name: String,
    prompts: Rc<PromptRenderer>,
    patcher: Rc<dyn PatchApplier>,
    learning: LearningLog,
    learning_examples: usize,
    max_source_bytes: usize,
    extensions: Vec<String>,
}

impl RefineRole {
    pub fn new(deps: &RoleDeps) -> Self {
        Self {
            model: Rc::clone(&deps.model),
            model_name: deps.model_name().to_string(),
            prompts: Rc::clone(&deps.prompts),
            patcher: Rc::clone(&deps.patcher),
            learning: deps.learning.clone(),
            learning_examples: deps.config.refine.learning_examples,
            max_source_bytes: deps.config.refine.max_source_bytes,
            extensions: deps.config.refine.extensions.clone(),
        }
    }

    fn build_prompt(&self, state: &CycleState) -> Result<String, AbortReason> {
        let files = source_files(&state.code_dir, &self.extensions);
        let targets: Vec<&str> = state.todos.iter().map(|t| t.file_path.as_str()).collect();
        let current_code = render_sources(&files, &targets, self.max_source_bytes);
        let learning = self.learning.recent(self.learning_examples);
        let errors = &state.metadata.errors;
        let previous_errors = &errors[errors.len().saturating_sub(PREVIOUS_ERRORS_SHOWN)..];
        self.prompts
            .refine(&RefinePrompt {
                goal: &state.goal,
                todos: &state.todos,
                current_code: &current_code,
                learning: &learning,
                previous_errors,
            })
            .map_err(|e| AbortReason::Internal(format!("{e:#}")))
    }
}

impl Role for RefineRole {
    fn name(&self) -> &str {
        "refine"
    }

    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason> {
        if state.should_abort {
            return Ok(());
        }
        if state.todos.is_empty() {
            info!("no todos, skipping refine");
            return Ok(());
        }
        let prompt = self.build_prompt(state)?;
        let response = self
            .model
            .call(&self.model_name, &prompt, None)
            .map_err(|e| AbortReason::Model(e.to_string()))?;

        let Some(patch) = extract_patch(&response) else {
            warn!(response_bytes = response.len(), "refine response contained no diff");
            return Ok(());
        };
        debug!(files = ?touched_files(&patch), "patch generated");
        state.patch = Some(patch.clone());

        match self.patcher.apply(&patch, &state.code_dir) {
            Ok(true) => {
                state.metadata.worktree_dirty = true;
                info!("patch applied");
                Ok(())
            }
            Ok(false) => Err(AbortReason::PatchNotApplied(
                "patch does not apply to the working tree".to_string(),
            )),
            Err(e) => Err(AbortReason::PatchNotApplied(format!("{e:#}"))),
        }
    }
}
