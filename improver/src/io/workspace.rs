//! Read-only views of the code directory for prompts and metrics.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv", "dist", "build"];

/// Files larger than this are left out of prompts and metrics.
const MAX_FILE_BYTES: u64 = 256 * 1024;

/// A source file read from the code directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the code directory, `/`-separated.
    pub path: String,
    pub contents: String,
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&&*name))
}

fn walk(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
}

fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Indented listing of directories and files (hidden and build dirs skipped).
pub fn project_structure(root: &Path) -> String {
    let mut out = String::new();
    for entry in walk(root).filter(|e| e.depth() > 0) {
        let indent = "  ".repeat(entry.depth() - 1);
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            out.push_str(&format!("{indent}{name}/\n"));
        } else {
            out.push_str(&format!("{indent}{name}\n"));
        }
    }
    out
}

/// Text files under `root` whose extension is in `extensions`, in path order.
///
/// Unreadable, non-UTF-8 and oversized files are skipped.
pub fn source_files(root: &Path, extensions: &[String]) -> Vec<SourceFile> {
    let mut files = Vec::new();
    for entry in walk(root).filter(|e| e.file_type().is_file()) {
        let path: PathBuf = entry.path().to_path_buf();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want == ext));
        if !matches {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            debug!(path = %path.display(), "skipping oversized file");
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => files.push(SourceFile {
                path: relative(root, &path),
                contents,
            }),
            Err(err) => warn!(path = %path.display(), %err, "skipping unreadable file"),
        }
    }
    files
}

/// Concatenate source files as `### <path>` sections, stopping before `max_bytes`.
///
/// Files named in `priority_paths` come first so the files a change targets
/// survive the budget.
pub fn render_sources(files: &[SourceFile], priority_paths: &[&str], max_bytes: usize) -> String {
    let (first, rest): (Vec<&SourceFile>, Vec<&SourceFile>) = files
        .iter()
        .partition(|f| priority_paths.contains(&f.path.as_str()));
    let mut out = String::new();
    let mut omitted = 0usize;
    for file in first.into_iter().chain(rest) {
        let section = format!("### {}\n```\n{}\n```\n\n", file.path, file.contents.trim_end());
        if out.len() + section.len() > max_bytes {
            omitted += 1;
            continue;
        }
        out.push_str(&section);
    }
    if omitted > 0 {
        out.push_str(&format!("[{omitted} file(s) omitted to stay within the prompt budget]\n"));
    }
    out
}
