//! Shared data model for the cycle engine.
//!
//! These types are serialized into the goal store, snapshots and the learning
//! log, so their field names form the on-disk contract. They must not depend on
//! I/O.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a goal in the goal store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Pending,
    Completed,
}

/// Relative importance of a goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// A unit of intended improvement.
///
/// Goals are only ever appended to the store; the single mutation is flipping
/// `status` to [`GoalStatus::Completed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Goal {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: GoalStatus::Pending,
            priority: Priority::Medium,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == GoalStatus::Pending
    }
}

/// Kind of change a todo requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// A structured, file-scoped change request derived from a goal description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub file_path: String,
    pub change_type: ChangeKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
}

/// Outcome of running the project's test suite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    /// Set when the runner itself could not complete (e.g. binary missing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResults {
    /// Results recorded when the test infrastructure failed before producing output.
    pub fn infrastructure_failure(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// One-line human summary used in prompts and logs.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!("error: {error}");
        }
        if self.timed_out {
            return "timed out".to_string();
        }
        let verdict = if self.passed { "passed" } else { "failed" };
        match self.exit_code {
            Some(code) => format!("{verdict} (exit code {code})"),
            None => verdict.to_string(),
        }
    }
}

/// Cross-stage side-channel data carried on the cycle state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleMetadata {
    /// 1-indexed attempt number of the attempt that produced this state.
    pub attempt: u32,
    /// RFC 3339 timestamp of the attempt start.
    pub started_at: Option<String>,
    /// Abort reasons, one line per abort, prefixed with attempt and role.
    pub errors: Vec<String>,
    /// True while a patch is applied to the working tree and not yet kept or reverted.
    pub worktree_dirty: bool,
    /// Free-form role data.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The single mutable record threaded through every role within one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleState {
    pub code_dir: PathBuf,
    pub goal: Goal,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub test_results: Option<TestResults>,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub should_abort: bool,
    #[serde(default)]
    pub metadata: CycleMetadata,
}

impl CycleState {
    /// Brand-new state for a goal that has no snapshot.
    pub fn new(code_dir: impl Into<PathBuf>, goal: Goal) -> Self {
        Self {
            code_dir: code_dir.into(),
            goal,
            todos: Vec::new(),
            patch: None,
            test_results: None,
            review: None,
            accepted: false,
            should_abort: false,
            metadata: CycleMetadata::default(),
        }
    }

    /// Reset the per-attempt fields. `todos` and accumulated errors survive.
    pub fn begin_attempt(&mut self, attempt: u32, started_at: String) {
        self.patch = None;
        self.test_results = None;
        self.review = None;
        self.accepted = false;
        self.should_abort = false;
        self.metadata.attempt = attempt;
        self.metadata.started_at = Some(started_at);
        self.metadata.worktree_dirty = false;
    }

    /// Mark the attempt aborted and leave a traceable reason behind.
    pub fn abort(&mut self, role: &str, reason: &AbortReason) {
        self.should_abort = true;
        self.accepted = false;
        self.metadata
            .errors
            .push(format!("attempt {}: {role}: {reason}", self.metadata.attempt));
    }
}

/// Why a role stopped the current attempt.
///
/// Roles return this as a value instead of raising; the engine records it in
/// `metadata.errors` and ends the attempt loop for the goal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error("model call failed: {0}")]
    Model(String),
    #[error("invalid todos: {0}")]
    InvalidTodos(String),
    #[error("patch did not apply: {0}")]
    PatchNotApplied(String),
    #[error("test runner unavailable: {0}")]
    TestRunnerUnavailable(String),
    #[error("change rejected: {0}")]
    Rejected(String),
    #[error("internal error: {0}")]
    Internal(String),
}
