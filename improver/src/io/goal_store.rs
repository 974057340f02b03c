//! Durable goal queue backed by a JSON file (`{"goals": [...]}`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::atomic::write_json_atomic;
use crate::core::types::{Goal, GoalStatus};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GoalFile {
    Wrapped { goals: Vec<Goal> },
    Bare(Vec<Goal>),
}

#[derive(Debug, Serialize)]
struct GoalFileRef<'a> {
    goals: &'a [Goal],
}

/// Ordered goal queue.
///
/// Goals are appended, never removed; the only in-place mutation is marking a
/// goal completed. Every mutation is persisted before the call returns.
#[derive(Debug)]
pub struct GoalStore {
    path: PathBuf,
    goals: Vec<Goal>,
    /// Index of the next goal `next_goal` considers.
    cursor: usize,
    /// Set when the backing file could not be parsed; the original is moved
    /// aside before the first write.
    unreadable: bool,
}

impl GoalStore {
    /// Load goals from `path`.
    ///
    /// A missing file yields an empty store. A malformed file also yields an
    /// empty store (logged) so the engine can still start.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (goals, unreadable) = match read_goals(&path) {
            Ok(Some(goals)) => (goals, false),
            Ok(None) => {
                info!(path = %path.display(), "no goal file yet, starting empty");
                (Vec::new(), false)
            }
            Err(err) => {
                error!(path = %path.display(), err = %format!("{err:#}"), "goal file unreadable, starting empty");
                (Vec::new(), true)
            }
        };
        debug!(count = goals.len(), "goals loaded");
        Self {
            path,
            goals,
            cursor: 0,
            unreadable,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.goals.iter().filter(|g| g.is_pending()).count()
    }

    /// Next pending goal in stored order, starting from the scan cursor.
    ///
    /// The cursor moves past the returned goal, so a goal that stays pending
    /// (aborted or out of attempts) is not offered again by this store
    /// instance. Goals appended later are still reached.
    pub fn next_goal(&mut self) -> Option<Goal> {
        let offset = self.goals[self.cursor.min(self.goals.len())..]
            .iter()
            .position(Goal::is_pending)?;
        let index = self.cursor + offset;
        self.cursor = index + 1;
        Some(self.goals[index].clone())
    }

    /// Mark a goal completed and persist.
    ///
    /// Returns `Ok(false)` (with a warning) when the id is unknown or the goal
    /// was already completed; nothing is written in that case.
    pub fn mark_done(&mut self, id: &str) -> Result<bool> {
        let Some(goal) = self.goals.iter_mut().find(|g| g.id == id) else {
            warn!(goal_id = id, "mark_done: unknown goal id");
            return Ok(false);
        };
        if goal.status == GoalStatus::Completed {
            warn!(goal_id = id, "mark_done: goal already completed");
            return Ok(false);
        }
        goal.status = GoalStatus::Completed;
        self.persist()?;
        info!(goal_id = id, "goal completed");
        Ok(true)
    }

    /// Append a goal and persist. Duplicate ids are rejected.
    pub fn add_goal(&mut self, goal: Goal) -> Result<()> {
        if goal.id.trim().is_empty() {
            return Err(anyhow!("goal id must not be empty"));
        }
        if self.contains(&goal.id) {
            return Err(anyhow!("goal '{}' already exists", goal.id));
        }
        debug!(goal_id = %goal.id, "adding goal");
        self.goals.push(goal);
        self.persist()
    }

    fn persist(&mut self) -> Result<()> {
        if self.unreadable && self.path.exists() {
            let backup = self.path.with_extension("json.bak");
            fs::rename(&self.path, &backup)
                .with_context(|| format!("move unreadable goal file to {}", backup.display()))?;
            warn!(backup = %backup.display(), "preserved unreadable goal file");
        }
        self.unreadable = false;
        write_json_atomic(&self.path, &GoalFileRef { goals: &self.goals })
            .with_context(|| format!("persist goals {}", self.path.display()))
    }
}

fn read_goals(path: &Path) -> Result<Option<Vec<Goal>>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Some(Vec::new()));
    }
    let file: GoalFile =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(match file {
        GoalFile::Wrapped { goals } | GoalFile::Bare(goals) => goals,
    }))
}

/// Write an empty goal file.
pub fn write_empty(path: &Path) -> Result<()> {
    write_json_atomic(path, &GoalFileRef { goals: &[] })
}
