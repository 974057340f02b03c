//! Test-only fakes for the engine's seams and small fixture helpers.
//!
//! Every fake is `Clone` and shares its recorded state between clones, so a
//! test can hand one copy to the code under test and inspect the other.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::patch::touched_files;
use crate::core::types::{AbortReason, ChangeKind, CycleState, TestResults, Todo};
use crate::io::config::EngineConfig;
use crate::io::learning_log::LearningLog;
use crate::io::model::{ModelCallError, ModelClient};
use crate::io::patch::PatchApplier;
use crate::io::prompt::PromptRenderer;
use crate::io::test_runner::TestRunner;
use crate::roles::{Role, RoleDeps};

/// Line appended to every file the fake patcher "edits".
pub const FAKE_PATCH_MARKER: &str = "// edited by fake patcher\n";

/// Model client that replays canned responses in order and records prompts.
///
/// An exhausted script answers with [`ModelCallError::EmptyResponse`].
#[derive(Clone, Default)]
pub struct ScriptedModel {
    responses: Rc<RefCell<VecDeque<Result<String, ModelCallError>>>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = Result<String, ModelCallError>>) -> Self {
        Self {
            responses: Rc::new(RefCell::new(responses.into_iter().collect())),
            prompts: Rc::default(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn call(&self, _model: &str, prompt: &str, _system: Option<&str>) -> Result<String, ModelCallError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(ModelCallError::EmptyResponse))
    }
}

#[derive(Default)]
struct FakePatchState {
    reject: bool,
    applied: Vec<String>,
    /// Original contents of every file touched since the last keep/revert;
    /// `None` when the file did not exist.
    backups: Vec<(PathBuf, Option<Vec<u8>>)>,
    reverts: usize,
    keeps: usize,
}

/// Patch applier that edits touched files by appending [`FAKE_PATCH_MARKER`]
/// and restores them byte-for-byte on revert.
#[derive(Clone, Default)]
pub struct FakePatchApplier {
    state: Rc<RefCell<FakePatchState>>,
}

impl FakePatchApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// An applier whose `apply` always reports the patch as not applicable.
    pub fn rejecting() -> Self {
        let applier = Self::default();
        applier.state.borrow_mut().reject = true;
        applier
    }

    /// Patches successfully applied, in order.
    pub fn applied(&self) -> Vec<String> {
        self.state.borrow().applied.clone()
    }

    pub fn reverts(&self) -> usize {
        self.state.borrow().reverts
    }

    pub fn keeps(&self) -> usize {
        self.state.borrow().keeps
    }
}

impl PatchApplier for FakePatchApplier {
    fn apply(&self, patch: &str, workdir: &Path) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.reject {
            return Ok(false);
        }
        for rel in touched_files(patch) {
            let path = workdir.join(&rel);
            let original = fs::read(&path).ok();
            if !state.backups.iter().any(|(p, _)| *p == path) {
                state.backups.push((path.clone(), original.clone()));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut contents = original.unwrap_or_default();
            contents.extend_from_slice(FAKE_PATCH_MARKER.as_bytes());
            fs::write(&path, contents)?;
        }
        state.applied.push(patch.to_string());
        Ok(true)
    }

    fn revert_all(&self, _workdir: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.reverts += 1;
        for (path, original) in state.backups.drain(..).rev() {
            match original {
                Some(bytes) => fs::write(&path, bytes)?,
                None => {
                    if path.exists() {
                        fs::remove_file(&path)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn keep(&self, _workdir: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.keeps += 1;
        state.backups.clear();
        Ok(())
    }
}

/// Test runner that replays scripted results; `Err` entries simulate an
/// unavailable runner. An exhausted script is an error too.
#[derive(Clone, Default)]
pub struct ScriptedTestRunner {
    results: Rc<RefCell<VecDeque<Result<TestResults, String>>>>,
    calls: Rc<Cell<usize>>,
}

impl ScriptedTestRunner {
    pub fn new(results: impl IntoIterator<Item = Result<TestResults, String>>) -> Self {
        Self {
            results: Rc::new(RefCell::new(results.into_iter().collect())),
            calls: Rc::default(),
        }
    }

    pub fn passed() -> TestResults {
        TestResults {
            passed: true,
            stdout: "test result: ok".to_string(),
            exit_code: Some(0),
            ..TestResults::default()
        }
    }

    pub fn failed(stdout: &str) -> TestResults {
        TestResults {
            passed: false,
            stdout: stdout.to_string(),
            exit_code: Some(101),
            ..TestResults::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _workdir: &Path) -> Result<TestResults> {
        self.calls.set(self.calls.get() + 1);
        match self.results.borrow_mut().pop_front() {
            Some(Ok(results)) => Ok(results),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Err(anyhow!("no scripted test result left")),
        }
    }
}

type RoleBody = dyn Fn(&mut CycleState) -> Result<(), AbortReason>;

/// Role driven by a closure; counts invocations across clones.
#[derive(Clone)]
pub struct ScriptedRole {
    name: String,
    body: Rc<RoleBody>,
    calls: Rc<Cell<usize>>,
}

impl ScriptedRole {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut CycleState) -> Result<(), AbortReason> + 'static,
    {
        Self {
            name: name.to_string(),
            body: Rc::new(body),
            calls: Rc::default(),
        }
    }

    pub fn noop(name: &str) -> Self {
        Self::new(name, |_| Ok(()))
    }

    /// Sets `accepted` like an acceptance role would.
    pub fn accepting(name: &str) -> Self {
        Self::new(name, |state| {
            state.accepted = true;
            state.review = Some("accepted".to_string());
            Ok(())
        })
    }

    pub fn aborting(name: &str, reason: AbortReason) -> Self {
        Self::new(name, move |_| Err(reason.clone()))
    }

    pub fn panicking(name: &str, message: &'static str) -> Self {
        Self::new(name, move |_| panic!("{message}"))
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Role for ScriptedRole {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason> {
        self.calls.set(self.calls.get() + 1);
        (self.body)(state)
    }
}

/// Role that does nothing but notice whether it was invoked after an abort.
#[derive(Clone)]
pub struct SentinelRole {
    name: String,
    calls: Rc<Cell<usize>>,
    violations: Rc<Cell<usize>>,
}

impl SentinelRole {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Rc::default(),
            violations: Rc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Invocations that happened while `should_abort` was already set.
    pub fn violations(&self) -> usize {
        self.violations.get()
    }
}

impl Role for SentinelRole {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, state: &mut CycleState) -> Result<(), AbortReason> {
        self.calls.set(self.calls.get() + 1);
        if state.should_abort {
            self.violations.set(self.violations.get() + 1);
        }
        Ok(())
    }
}

/// Builds [`RoleDeps`] rooted at a temp directory with inert fakes by default.
pub struct RoleDepsBuilder {
    root: PathBuf,
    config: EngineConfig,
    model: Rc<dyn ModelClient>,
    patcher: Rc<dyn PatchApplier>,
    tests: Rc<dyn TestRunner>,
}

impl RoleDepsBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            config: EngineConfig::default(),
            model: Rc::new(ScriptedModel::default()),
            patcher: Rc::new(FakePatchApplier::new()),
            tests: Rc::new(ScriptedTestRunner::default()),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, model: ScriptedModel) -> Self {
        self.model = Rc::new(model);
        self
    }

    pub fn patcher(mut self, patcher: impl PatchApplier + 'static) -> Self {
        self.patcher = Rc::new(patcher);
        self
    }

    pub fn tests(mut self, tests: ScriptedTestRunner) -> Self {
        self.tests = Rc::new(tests);
        self
    }

    pub fn build(self) -> RoleDeps {
        RoleDeps {
            config: Rc::new(self.config),
            code_dir: self.root.clone(),
            model: self.model,
            patcher: self.patcher,
            tests: self.tests,
            prompts: Rc::new(PromptRenderer::builtin()),
            learning: LearningLog::in_memory_dir(&self.root.join(".improver").join("memory")),
        }
    }
}

pub fn role_deps(root: &Path) -> RoleDeps {
    RoleDepsBuilder::new(root).build()
}

pub fn role_deps_with(root: &Path, model: ScriptedModel) -> RoleDeps {
    RoleDepsBuilder::new(root).model(model).build()
}

/// A single modify todo against `src/lib.rs`.
pub fn sample_todo() -> Todo {
    Todo {
        file_path: "src/lib.rs".to_string(),
        change_type: ChangeKind::Modify,
        description: "add foo".to_string(),
        line_start: None,
        line_end: None,
    }
}

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, contents).expect("write file");
}
