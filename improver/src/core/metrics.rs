//! Lightweight source metrics used to seed autonomous goal synthesis.
//!
//! Counting is line-based and language-agnostic on purpose: it only has to be
//! good enough to rank improvement areas, not to parse code.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::{Goal, Priority};

/// Files longer than this many lines are reported as a smell.
pub const LONG_FILE_LINES: usize = 500;

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:fn|def|function)\s+\w+")
        .expect("function regex")
});
static DOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:///|//!|"""|/\*\*)"#).expect("doc regex"));

/// Aggregate metrics for a source tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeMetrics {
    pub file_count: usize,
    pub line_count: usize,
    pub function_count: usize,
    pub documented_functions: usize,
    pub smells: Vec<String>,
}

impl CodeMetrics {
    /// Collect metrics from `(relative path, contents)` pairs.
    pub fn collect<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut metrics = Self::default();
        for (path, contents) in files {
            metrics.file_count += 1;
            let lines: Vec<&str> = contents.lines().collect();
            metrics.line_count += lines.len();
            for (idx, line) in lines.iter().enumerate() {
                if !FUNCTION_RE.is_match(line) {
                    continue;
                }
                metrics.function_count += 1;
                let documented = idx > 0 && DOC_RE.is_match(lines[idx - 1])
                    || lines.get(idx + 1).is_some_and(|next| DOC_RE.is_match(next));
                if documented {
                    metrics.documented_functions += 1;
                }
            }
            if lines.len() > LONG_FILE_LINES {
                metrics
                    .smells
                    .push(format!("long file: {path} ({} lines)", lines.len()));
            }
        }
        metrics
    }

    /// Percentage of functions with an adjacent doc comment (100 when there are none).
    pub fn documentation_ratio(&self) -> f64 {
        if self.function_count == 0 {
            return 100.0;
        }
        self.documented_functions as f64 / self.function_count as f64 * 100.0
    }
}

/// An improvement area derived from metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub area: String,
    pub priority: Priority,
    pub description: String,
    pub suggested_approach: String,
}

/// Rank improvement areas from metrics, most important first.
pub fn opportunities(metrics: &CodeMetrics) -> Vec<Opportunity> {
    let mut out = Vec::new();
    if !metrics.smells.is_empty() {
        out.push(Opportunity {
            area: "refactoring".to_string(),
            priority: Priority::High,
            description: format!(
                "Found {} code smells requiring attention",
                metrics.smells.len()
            ),
            suggested_approach: "Split large files into smaller, focused modules".to_string(),
        });
    }
    out.push(Opportunity {
        area: "testing".to_string(),
        priority: Priority::High,
        description: "Test coverage analysis and improvement needed".to_string(),
        suggested_approach: "Add tests for untested public functions".to_string(),
    });
    let ratio = metrics.documentation_ratio();
    if ratio < 50.0 {
        out.push(Opportunity {
            area: "documentation".to_string(),
            priority: Priority::Medium,
            description: format!("Documentation coverage is only {ratio:.1}%"),
            suggested_approach: "Add doc comments to public functions".to_string(),
        });
    }
    out
}

/// Turn opportunities into pending goals with stable `auto-<area>` ids.
pub fn goals_from_opportunities(opportunities: &[Opportunity], limit: usize) -> Vec<Goal> {
    opportunities
        .iter()
        .take(limit)
        .map(|opp| {
            let mut goal = Goal::new(
                format!("auto-{}", opp.area),
                format!("Improve {}: {}", opp.area, opp.description),
            )
            .with_priority(opp.priority);
            goal.metadata
                .insert("auto_generated".to_string(), serde_json::Value::Bool(true));
            goal.metadata.insert(
                "suggested_approach".to_string(),
                serde_json::Value::String(opp.suggested_approach.clone()),
            );
            goal
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_functions_and_docs() {
        let src = "/// Adds.\npub fn add() {}\nfn helper() {}\n";
        let py = "def run():\n    \"\"\"Run it.\"\"\"\n    pass\n";
        let metrics = CodeMetrics::collect([("src/lib.rs", src), ("tool.py", py)]);
        assert_eq!(metrics.file_count, 2);
        assert_eq!(metrics.line_count, 6);
        assert_eq!(metrics.function_count, 3);
        assert_eq!(metrics.documented_functions, 2);
        assert!(metrics.smells.is_empty());
    }

    #[test]
    fn long_files_become_refactoring_goal() {
        let long = "x\n".repeat(LONG_FILE_LINES + 1);
        let metrics = CodeMetrics::collect([("big.rs", long.as_str())]);
        let opps = opportunities(&metrics);
        assert_eq!(opps[0].area, "refactoring");

        let goals = goals_from_opportunities(&opps, 1);
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].id, "auto-refactoring");
        assert_eq!(goals[0].priority, Priority::High);
        assert_eq!(
            goals[0].metadata.get("auto_generated"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn undocumented_code_suggests_documentation() {
        let metrics = CodeMetrics::collect([("a.rs", "fn a() {}\nfn b() {}\n")]);
        assert!(opportunities(&metrics)
            .iter()
            .any(|opp| opp.area == "documentation"));
    }
}
