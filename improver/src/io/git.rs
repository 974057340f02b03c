//! Thin wrapper around `git` subprocess calls used to apply and undo patches.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// Outcome of a `git apply` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// git refused the patch; carries its stderr.
    Rejected(String),
}

/// Executes git commands in a fixed working directory.
///
/// `git apply` also works outside a repository, so patch application does not
/// require `workdir` to be under version control.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when `workdir` is inside a git work tree.
    pub fn is_repository(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Path of `workdir` relative to the repository top level (`""` at the top).
    pub fn show_prefix(&self) -> Option<String> {
        let out = self.run(&["rev-parse", "--show-prefix"]).ok()?;
        if !out.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Apply (or with `reverse`, un-apply) the patch stored at `patch_file`.
    ///
    /// Patch paths are relative to `workdir`. Inside a repository git reads
    /// them relative to the top level, so the subdirectory prefix is passed
    /// through `--directory`.
    #[instrument(skip_all, fields(patch = %patch_file.display(), reverse))]
    pub fn apply(&self, patch_file: &Path, reverse: bool) -> Result<ApplyOutcome> {
        let file = patch_file.to_string_lossy();
        let directory = self
            .show_prefix()
            .filter(|prefix| !prefix.is_empty())
            .map(|prefix| format!("--directory={}", prefix.trim_end_matches('/')));
        let mut args = vec!["apply", "--whitespace=nowarn"];
        if let Some(directory) = &directory {
            args.push(directory);
        }
        if reverse {
            args.push("-R");
        }
        args.push(&file);
        let output = self.run(&args)?;
        if output.status.success() {
            debug!("patch applied");
            return Ok(ApplyOutcome::Applied);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(%stderr, "git apply rejected patch");
        Ok(ApplyOutcome::Rejected(stderr))
    }

    /// True when `path` (relative to `workdir`) is tracked at HEAD.
    pub fn is_tracked(&self, path: &str) -> Result<bool> {
        let spec = format!("HEAD:./{path}");
        Ok(self.run(&["cat-file", "-e", &spec])?.status.success())
    }

    /// Restore a tracked path to its HEAD contents in index and worktree.
    #[instrument(skip_all, fields(path))]
    pub fn restore_path(&self, path: &str) -> Result<()> {
        self.run_checked(&["checkout", "HEAD", "--", path])?;
        Ok(())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-uall"])?;
        let text = String::from_utf8_lossy(&out.stdout);
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
