//! Pipeline stages ("roles") and the chain the engine drives.
//!
//! A role mutates the shared [`CycleState`] in place and reports expected
//! failures as an [`AbortReason`] value. Roles never see each other; they only
//! communicate through the state.

use std::path::PathBuf;
use std::rc::Rc;

use crate::core::types::{AbortReason, CycleState};
use crate::io::config::EngineConfig;
use crate::io::learning_log::LearningLog;
use crate::io::model::ModelClient;
use crate::io::patch::PatchApplier;
use crate::io::prompt::PromptRenderer;
use crate::io::test_runner::TestRunner;

pub mod goal_generation;
pub mod identify;
pub mod refine;
pub mod registry;
pub mod review;
pub mod verify;

/// One pipeline stage.
///
/// Contract:
/// - Return `Err` for expected failures; the engine records the reason and
///   stops the attempt.
/// - No-op when `state.should_abort` is already set or required inputs are
///   missing.
/// - Only acceptance roles may set `state.accepted`.
pub trait Role {
    fn name(&self) -> &str;
    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason>;
}

/// Ordered, immutable list of roles.
pub struct RoleChain {
    roles: Vec<Box<dyn Role>>,
}

impl RoleChain {
    pub fn new(roles: Vec<Box<dyn Role>>) -> Self {
        Self { roles }
    }

    pub fn roles(&self) -> &[Box<dyn Role>] {
        &self.roles
    }

    pub fn names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Collaborators and settings handed to role factories.
#[derive(Clone)]
pub struct RoleDeps {
    pub config: Rc<EngineConfig>,
    pub code_dir: PathBuf,
    pub model: Rc<dyn ModelClient>,
    pub patcher: Rc<dyn PatchApplier>,
    pub tests: Rc<dyn TestRunner>,
    pub prompts: Rc<PromptRenderer>,
    pub learning: LearningLog,
}

impl RoleDeps {
    pub fn model_name(&self) -> &str {
        &self.config.model.model_name
    }
}
