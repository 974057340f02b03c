//! Per-goal cycle-state snapshots, one JSON file per attempt.
//!
//! Layout: `<memory>/<goal_id>/<seq:06>_<timestamp>.json`. The zero-padded
//! sequence number makes "latest" a plain lexical maximum even when two
//! attempts share a timestamp.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::{CycleState, Goal};

/// One persisted attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub goal_id: String,
    pub description: String,
    pub attempt: u32,
    pub recorded_at: String,
    pub state: CycleState,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True iff at least one readable snapshot exists for the goal.
    pub fn has(&self, goal_id: &str) -> bool {
        self.load_latest(goal_id).is_some()
    }

    pub fn count(&self, goal_id: &str) -> usize {
        self.snapshot_files(goal_id).len()
    }

    /// Persist `state` as a new snapshot. Failures are logged, never returned.
    #[instrument(skip_all, fields(goal_id = %state.goal.id, attempt = state.metadata.attempt))]
    pub fn record(&self, state: &CycleState) -> Option<PathBuf> {
        match self.try_record(state) {
            Ok(path) => {
                debug!(path = %path.display(), "snapshot recorded");
                Some(path)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "snapshot write failed; resumability degraded");
                None
            }
        }
    }

    fn try_record(&self, state: &CycleState) -> Result<PathBuf> {
        let dir = self.goal_dir(&state.goal.id);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let seq = self
            .snapshot_files(&state.goal.id)
            .last()
            .and_then(|p| sequence_of(p))
            .map_or(1, |n| n + 1);
        let now = Utc::now();
        let snapshot = Snapshot {
            goal_id: state.goal.id.clone(),
            description: state.goal.description.clone(),
            attempt: state.metadata.attempt,
            recorded_at: now.to_rfc3339(),
            state: state.clone(),
        };
        let path = dir.join(format!("{seq:06}_{}.json", now.format("%Y%m%dT%H%M%S%.6fZ")));
        let mut buf = serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }

    /// Most recent readable snapshot for the goal, if any.
    ///
    /// Unreadable files, and files recorded for a different goal id, are
    /// skipped with a warning, falling back to older ones.
    pub fn load_latest(&self, goal_id: &str) -> Option<Snapshot> {
        for path in self.snapshot_files(goal_id).iter().rev() {
            match read_snapshot(path) {
                Ok(snapshot) if snapshot.goal_id != goal_id => {
                    warn!(
                        path = %path.display(),
                        recorded_for = %snapshot.goal_id,
                        "skipping snapshot of another goal"
                    );
                }
                Ok(snapshot) => {
                    debug!(path = %path.display(), attempt = snapshot.attempt, "loaded snapshot");
                    return Some(snapshot);
                }
                Err(err) => {
                    warn!(path = %path.display(), err = %format!("{err:#}"), "skipping unreadable snapshot");
                }
            }
        }
        None
    }

    /// Latest snapshot state with `goal` overlaid on the stored goal.
    ///
    /// The goal store owns goal status; the snapshot contributes todos,
    /// metadata and the last patch. `code_dir` always comes from the caller.
    pub fn resume(&self, goal: &Goal, code_dir: &Path) -> Option<CycleState> {
        let mut state = self.load_latest(&goal.id)?.state;
        state.goal = goal.clone();
        state.code_dir = code_dir.to_path_buf();
        Some(state)
    }

    fn goal_dir(&self, goal_id: &str) -> PathBuf {
        self.root.join(dir_name(goal_id))
    }

    /// Snapshot files for a goal in ascending order.
    fn snapshot_files(&self, goal_id: &str) -> Vec<PathBuf> {
        let dir = self.goal_dir(goal_id);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json") && sequence_of(p).is_some())
            .collect();
        files.sort();
        files
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn sequence_of(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (seq, _) = stem.split_once('_')?;
    seq.parse().ok()
}

/// Map a goal id onto a single safe path component.
///
/// ASCII alphanumerics and `-` pass through, as does `.` anywhere but the
/// first position. Every other byte becomes `_xx` (lowercase hex), so `_`
/// only ever starts an escape and distinct ids never share a directory.
fn dir_name(goal_id: &str) -> String {
    let mut name = String::with_capacity(goal_id.len());
    for (idx, byte) in goal_id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && idx > 0);
        if keep {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{byte:02x}"));
        }
    }
    if name.is_empty() {
        name.push('_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChangeKind, GoalStatus, Todo};

    fn state(attempt: u32) -> CycleState {
        let mut state = CycleState::new("/code", Goal::new("g1", "add function foo"));
        state.begin_attempt(attempt, "2026-01-01T00:00:00Z".to_string());
        state.todos.push(Todo {
            file_path: "src/lib.rs".to_string(),
            change_type: ChangeKind::Modify,
            description: "add foo".to_string(),
            line_start: None,
            line_end: None,
        });
        state
    }

    #[test]
    fn has_and_latest_follow_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        assert!(!store.has("g1"));
        assert!(store.load_latest("g1").is_none());

        store.record(&state(1)).expect("first");
        store.record(&state(2)).expect("second");

        assert!(store.has("g1"));
        assert_eq!(store.count("g1"), 2);
        assert_eq!(store.load_latest("g1").map(|s| s.attempt), Some(2));
    }

    #[test]
    fn unreadable_latest_falls_back_to_previous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        store.record(&state(1)).expect("first");
        let second = store.record(&state(2)).expect("second");
        fs::write(&second, "garbage").expect("corrupt");

        assert_eq!(store.load_latest("g1").map(|s| s.attempt), Some(1));
    }

    #[test]
    fn resume_overlays_fresh_goal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        let mut stale = state(1);
        stale.goal.status = GoalStatus::Completed;
        stale.goal.description = "old text".to_string();
        store.record(&stale).expect("record");

        let fresh = Goal::new("g1", "add function foo");
        let resumed = store.resume(&fresh, Path::new("/elsewhere")).expect("resume");
        assert_eq!(resumed.goal, fresh);
        assert_eq!(resumed.code_dir, PathBuf::from("/elsewhere"));
        assert_eq!(resumed.todos.len(), 1);
    }

    #[test]
    fn write_failure_is_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("memory");
        fs::write(&blocker, "not a directory").expect("write");
        let store = SnapshotStore::new(&blocker);

        assert!(store.record(&state(1)).is_none());
        assert!(!store.has("g1"));
    }

    #[test]
    fn goal_ids_map_to_distinct_safe_dirs() {
        assert_eq!(dir_name("auto-testing"), "auto-testing");
        assert_eq!(dir_name("v1.2"), "v1.2");
        assert_eq!(dir_name("../escape"), "_2e._2fescape");
        assert_eq!(dir_name(".."), "_2e.");
        assert_eq!(dir_name(""), "_");
        assert_eq!(dir_name("fix a/b"), "fix_20a_2fb");
        assert_eq!(dir_name("fix a_b"), "fix_20a_5fb");
    }

    #[test]
    fn similar_ids_do_not_share_snapshots() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        let mut recorded = CycleState::new("/code", Goal::new("fix a/b", "slash"));
        recorded.begin_attempt(4, "2026-01-01T00:00:00Z".to_string());
        store.record(&recorded).expect("record");

        assert!(store.has("fix a/b"));
        assert!(!store.has("fix a_b"));
        let other = Goal::new("fix a_b", "underscore");
        assert!(store.resume(&other, Path::new("/code")).is_none());
        assert_eq!(
            store
                .resume(&Goal::new("fix a/b", "slash"), Path::new("/code"))
                .map(|s| s.metadata.attempt),
            Some(4)
        );
    }

    #[test]
    fn latest_skips_snapshot_recorded_for_another_goal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        store.record(&state(1)).expect("g1 snapshot");

        // A foreign file dropped into g1's directory with a higher sequence.
        let mut foreign = CycleState::new("/code", Goal::new("g2", "other"));
        foreign.begin_attempt(9, "2026-01-01T00:00:00Z".to_string());
        let snapshot = Snapshot {
            goal_id: "g2".to_string(),
            description: "other".to_string(),
            attempt: 9,
            recorded_at: "2026-01-01T00:00:00Z".to_string(),
            state: foreign,
        };
        fs::write(
            temp.path().join("g1").join("000099_20260101T000000.000000Z.json"),
            serde_json::to_string(&snapshot).expect("json"),
        )
        .expect("write foreign snapshot");

        assert_eq!(store.load_latest("g1").map(|s| s.attempt), Some(1));
    }
}
