//! Append-only JSONL record of attempt outcomes, replayed into refine prompts.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::response::truncate;
use crate::core::types::CycleState;

/// Longest test output kept per entry.
const TEST_OUTPUT_LIMIT: usize = 2_000;

/// One line of `learning_log.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub goal: String,
    pub patch: Option<String>,
    pub test_results: Option<String>,
    pub review: Option<String>,
    pub success: bool,
}

impl LearningEntry {
    /// Summarize a finished attempt.
    pub fn from_state(state: &CycleState) -> Self {
        let test_results = state.test_results.as_ref().map(|t| {
            let mut text = t.summary();
            let output = if t.stdout.trim().is_empty() {
                &t.stderr
            } else {
                &t.stdout
            };
            if !output.trim().is_empty() {
                text.push('\n');
                text.push_str(&truncate(output.trim(), TEST_OUTPUT_LIMIT));
            }
            text
        });
        Self {
            goal: state.goal.description.clone(),
            patch: state.patch.clone(),
            test_results,
            review: state.review.clone(),
            success: state.accepted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearningLog {
    path: PathBuf,
}

impl LearningLog {
    /// Log stored at `<memory_dir>/learning/learning_log.jsonl`.
    pub fn in_memory_dir(memory_dir: &Path) -> Self {
        Self::new(memory_dir.join("learning").join("learning_log.jsonl"))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LearningEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(entry).context("serialize learning entry")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))?;
        debug!(success = entry.success, "learning entry appended");
        Ok(())
    }

    /// Every readable entry in file order.
    pub fn entries(&self) -> Vec<LearningEntry> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(line = idx + 1, %err, "skipping malformed learning entry");
                    None
                }
            })
            .collect()
    }

    /// The last `n` readable entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LearningEntry> {
        let mut entries = self.entries();
        let skip = entries.len().saturating_sub(n);
        entries.drain(..skip);
        entries
    }
}
