//! Patch application and rollback against the working tree.

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::git::{ApplyOutcome, Git};
use crate::core::patch::touched_files;

/// Applies unified diffs to a working directory and undoes them.
pub trait PatchApplier {
    /// Apply `patch` inside `workdir`. `Ok(false)` means the patch was rejected
    /// and the tree is unchanged.
    fn apply(&self, patch: &str, workdir: &Path) -> Result<bool>;

    /// Undo every patch applied since the last `keep` or `revert_all`,
    /// newest first. Patches that were kept are left in place.
    fn revert_all(&self, workdir: &Path) -> Result<()>;

    /// Accept the patches applied since the last `keep` or `revert_all`: they
    /// stay in `workdir` and a later `revert_all` no longer touches them.
    fn keep(&self, workdir: &Path) -> Result<()>;
}

/// [`PatchApplier`] backed by `git apply`.
///
/// Patches applied since the last keep/revert are remembered so `revert_all`
/// can reverse exactly what this applier changed, leaving unrelated files
/// (including the engine's own memory directory) alone.
#[derive(Debug, Default)]
pub struct GitPatchApplier {
    applied: RefCell<Vec<String>>,
}

impl GitPatchApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_reverts(&self) -> usize {
        self.applied.borrow().len()
    }
}

impl PatchApplier for GitPatchApplier {
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn apply(&self, patch: &str, workdir: &Path) -> Result<bool> {
        let git = Git::new(workdir);
        let file = patch_file(patch)?;
        match git.apply(file.path(), false)? {
            ApplyOutcome::Applied => {
                info!(files = ?touched_files(patch), "patch applied");
                self.applied.borrow_mut().push(patch.to_string());
                Ok(true)
            }
            ApplyOutcome::Rejected(stderr) => {
                warn!(%stderr, "patch rejected by git apply");
                Ok(false)
            }
        }
    }

    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn revert_all(&self, workdir: &Path) -> Result<()> {
        let git = Git::new(workdir);
        let patches: Vec<String> = self.applied.borrow_mut().drain(..).collect();
        let mut failures = Vec::new();
        for patch in patches.iter().rev() {
            let file = patch_file(patch)?;
            match git.apply(file.path(), true)? {
                ApplyOutcome::Applied => debug!("patch reversed"),
                ApplyOutcome::Rejected(stderr) => {
                    warn!(%stderr, "reverse apply failed, restoring touched files");
                    if let Err(err) = restore_touched(&git, patch) {
                        failures.push(format!("{err:#}"));
                    }
                }
            }
        }
        if !failures.is_empty() {
            return Err(anyhow!("revert incomplete: {}", failures.join("; ")));
        }
        if git.is_repository()
            && let Ok(entries) = git.status_porcelain()
        {
            debug!(remaining_changes = entries.len(), "worktree after revert");
        }
        Ok(())
    }

    fn keep(&self, _workdir: &Path) -> Result<()> {
        let kept = self.applied.borrow_mut().drain(..).count();
        debug!(kept, "applied patches kept");
        Ok(())
    }
}

/// Fallback when a patch no longer reverses cleanly: put each touched file
/// back to HEAD, or remove it when HEAD never had it.
fn restore_touched(git: &Git, patch: &str) -> Result<()> {
    if !git.is_repository() {
        return Err(anyhow!(
            "{} is not a git repository; cannot restore touched files",
            git.workdir().display()
        ));
    }
    for path in touched_files(patch) {
        if git.is_tracked(&path)? {
            git.restore_path(&path)?;
        } else {
            let full = git.workdir().join(&path);
            if full.exists() {
                fs::remove_file(&full).with_context(|| format!("remove {}", full.display()))?;
            }
        }
    }
    Ok(())
}

fn patch_file(patch: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("improver-")
        .suffix(".patch")
        .tempfile()
        .context("create patch temp file")?;
    file.write_all(patch.as_bytes())
        .context("write patch temp file")?;
    file.flush().context("flush patch temp file")?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    const MODIFY: &str = "\
diff --git a/hello.txt b/hello.txt
--- a/hello.txt
+++ b/hello.txt
@@ -1 +1 @@
-hello
+goodbye
";

    const CREATE: &str = "\
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1 @@
+fresh
";

    fn init_git_repo(root: &Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(root)
                .status()
                .expect("spawn git");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn apply_then_revert_restores_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "hello\n").expect("write");
        let applier = GitPatchApplier::new();

        assert!(applier.apply(MODIFY, temp.path()).expect("apply"));
        assert!(applier.apply(CREATE, temp.path()).expect("apply"));
        assert_eq!(applier.pending_reverts(), 2);
        assert!(temp.path().join("new.txt").exists());

        applier.revert_all(temp.path()).expect("revert");
        assert_eq!(
            fs::read_to_string(temp.path().join("hello.txt")).expect("read"),
            "hello\n"
        );
        assert!(!temp.path().join("new.txt").exists());
        assert_eq!(applier.pending_reverts(), 0);
    }

    #[test]
    fn kept_patch_survives_later_revert() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "hello\n").expect("write");
        let applier = GitPatchApplier::new();

        assert!(applier.apply(MODIFY, temp.path()).expect("apply"));
        applier.keep(temp.path()).expect("keep");
        assert_eq!(applier.pending_reverts(), 0);

        assert!(applier.apply(CREATE, temp.path()).expect("apply"));
        applier.revert_all(temp.path()).expect("revert");
        assert_eq!(
            fs::read_to_string(temp.path().join("hello.txt")).expect("read"),
            "goodbye\n"
        );
        assert!(!temp.path().join("new.txt").exists());
    }

    #[test]
    fn rejected_patch_is_not_tracked() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "other\n").expect("write");
        let applier = GitPatchApplier::new();

        assert!(!applier.apply(MODIFY, temp.path()).expect("apply"));
        assert_eq!(applier.pending_reverts(), 0);
        applier.revert_all(temp.path()).expect("noop revert");
    }

    #[test]
    fn falls_back_to_head_when_reverse_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "hello\n").expect("write");
        init_git_repo(temp.path());
        let applier = GitPatchApplier::new();

        assert!(applier.apply(MODIFY, temp.path()).expect("apply"));
        // Edit on top of the patch so it no longer reverses.
        fs::write(temp.path().join("hello.txt"), "locally edited\n").expect("write");

        applier.revert_all(temp.path()).expect("revert");
        assert_eq!(
            fs::read_to_string(temp.path().join("hello.txt")).expect("read"),
            "hello\n"
        );
    }

    #[test]
    fn applies_relative_to_repo_subdirectory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sub = temp.path().join("pkg");
        fs::create_dir_all(&sub).expect("mkdir");
        fs::write(sub.join("hello.txt"), "hello\n").expect("write");
        init_git_repo(temp.path());
        let applier = GitPatchApplier::new();

        assert!(applier.apply(MODIFY, &sub).expect("apply"));
        assert_eq!(
            fs::read_to_string(sub.join("hello.txt")).expect("read"),
            "goodbye\n"
        );
        applier.revert_all(&sub).expect("revert");
        assert_eq!(fs::read_to_string(sub.join("hello.txt")).expect("read"), "hello\n");
    }
}
