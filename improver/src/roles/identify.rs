//! Identify: goal description → structured todos.

use std::rc::Rc;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info};

use super::{Role, RoleDeps};
use crate::core::todo::{dedupe, filter_excluded, parse_todos};
use crate::core::types::{AbortReason, CycleState};
use crate::io::model::ModelClient;
use crate::io::prompt::{IdentifyPrompt, PromptRenderer};
use crate::io::workspace::project_structure;

pub struct IdentifyRole {
    model: Rc<dyn ModelClient>,
    model_name: String,
    prompts: Rc<PromptRenderer>,
    exclude: Vec<Regex>,
}

impl IdentifyRole {
    pub fn new(deps: &RoleDeps) -> Result<Self> {
        Ok(Self {
            model: Rc::clone(&deps.model),
            model_name: deps.model_name().to_string(),
            prompts: Rc::clone(&deps.prompts),
            exclude: deps.config.identify.compiled_patterns()?,
        })
    }
}

impl Role for IdentifyRole {
    fn name(&self) -> &str {
        "identify"
    }

    /// Replaces `state.todos` on success so resumed todos are never duplicated.
    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason> {
        if state.should_abort {
            return Ok(());
        }
        let structure = project_structure(&state.code_dir);
        let prompt = self
            .prompts
            .identify(&IdentifyPrompt {
                goal: &state.goal,
                project_structure: &structure,
            })
            .map_err(|e| AbortReason::Internal(format!("{e:#}")))?;

        let response = self
            .model
            .call(&self.model_name, &prompt, None)
            .map_err(|e| AbortReason::Model(e.to_string()))?;
        debug!(response_bytes = response.len(), "identify response received");

        let todos = parse_todos(&response).map_err(|e| AbortReason::InvalidTodos(format!("{e:#}")))?;
        let (todos, excluded) = filter_excluded(todos, &self.exclude);
        state.todos = dedupe(todos);
        info!(todos = state.todos.len(), excluded, "todos identified");
        Ok(())
    }
}
