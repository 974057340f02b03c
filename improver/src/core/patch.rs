//! Diff text extraction from model responses.

use crate::core::response::strip_code_fences;

/// Extract unified-diff text from a model response.
///
/// Models often prepend prose; everything before the first `diff --git` or
/// `--- ` header line is dropped. Returns `None` when no diff header exists.
/// The result always ends with a newline, which `git apply` requires.
pub fn extract_patch(response: &str) -> Option<String> {
    let body = strip_code_fences(response);
    let mut offset = 0usize;
    let mut start = None;
    for line in body.split_inclusive('\n') {
        if line.starts_with("diff --git ") || line.starts_with("--- ") {
            start = Some(offset);
            break;
        }
        offset += line.len();
    }
    let patch = body[start?..].trim_end();
    if patch.is_empty() {
        return None;
    }
    Some(format!("{patch}\n"))
}

/// Paths touched by a diff, taken from `+++ b/<path>` headers (or `--- a/<path>`
/// for deletions), in first-seen order.
pub fn touched_files(patch: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    let mut last_old: Option<&str> = None;
    for line in patch.lines() {
        if let Some(old) = line.strip_prefix("--- ") {
            last_old = Some(old.trim());
            continue;
        }
        let Some(new) = line.strip_prefix("+++ ") else {
            continue;
        };
        let new = new.trim();
        let path = if new == "/dev/null" {
            last_old.map(strip_diff_prefix)
        } else {
            Some(strip_diff_prefix(new))
        };
        if let Some(path) = path
            && path != "/dev/null"
            && !files.iter().any(|f| f == path)
        {
            files.push(path.to_string());
        }
    }
    files
}

fn strip_diff_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1,2 @@\n pub fn a() {}\n+pub fn foo() {}\n";

    #[test]
    fn drops_preamble_and_fence() {
        let raw = format!("```diff\nHere is the patch:\n{DIFF}```");
        let patch = extract_patch(&raw).expect("patch");
        assert!(patch.starts_with("--- a/src/lib.rs"));
        assert!(patch.ends_with("+pub fn foo() {}\n"));
    }

    #[test]
    fn accepts_git_headers() {
        let raw = format!("diff --git a/src/lib.rs b/src/lib.rs\n{DIFF}");
        let patch = extract_patch(&raw).expect("patch");
        assert!(patch.starts_with("diff --git"));
    }

    #[test]
    fn no_header_means_no_patch() {
        assert_eq!(extract_patch("I could not produce a change."), None);
    }

    #[test]
    fn touched_files_handles_deletion() {
        let diff = format!("{DIFF}--- a/old.rs\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n");
        assert_eq!(touched_files(&diff), vec!["src/lib.rs", "old.rs"]);
    }
}
