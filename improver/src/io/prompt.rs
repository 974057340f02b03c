//! Prompt rendering with minijinja.
//!
//! Built-in templates are compiled into the binary. A file named
//! `<template>.md` in the configured prompts directory replaces the built-in
//! template of the same name.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::metrics::{CodeMetrics, Opportunity};
use crate::core::response::truncate;
use crate::core::types::{Goal, Todo};
use crate::io::learning_log::LearningEntry;

const IDENTIFY_TEMPLATE: &str = include_str!("prompts/identify.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const GOAL_GENERATION_TEMPLATE: &str = include_str!("prompts/goal_generation.md");

/// Longest single learning-log field shown in a prompt.
const LEARNING_FIELD_LIMIT: usize = 200;
/// Longest test output shown to the reviewer.
const REVIEW_TEST_OUTPUT_LIMIT: usize = 4_000;

/// Names of the templates the engine renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PromptKind {
    Identify,
    Refine,
    Review,
    GoalGeneration,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::Identify,
        PromptKind::Refine,
        PromptKind::Review,
        PromptKind::GoalGeneration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PromptKind::Identify => "identify",
            PromptKind::Refine => "refine",
            PromptKind::Review => "review",
            PromptKind::GoalGeneration => "goal_generation",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKind::Identify => IDENTIFY_TEMPLATE,
            PromptKind::Refine => REFINE_TEMPLATE,
            PromptKind::Review => REVIEW_TEMPLATE,
            PromptKind::GoalGeneration => GOAL_GENERATION_TEMPLATE,
        }
    }
}

pub struct IdentifyPrompt<'a> {
    pub goal: &'a Goal,
    pub project_structure: &'a str,
}

pub struct RefinePrompt<'a> {
    pub goal: &'a Goal,
    pub todos: &'a [Todo],
    pub current_code: &'a str,
    pub learning: &'a [LearningEntry],
    pub previous_errors: &'a [String],
}

pub struct ReviewPrompt<'a> {
    pub goal: &'a Goal,
    pub todos: &'a [Todo],
    pub patch: &'a str,
    pub test_summary: &'a str,
    pub test_output: &'a str,
}

pub struct GoalGenerationPrompt<'a> {
    pub metrics: &'a CodeMetrics,
    pub opportunities: &'a [Opportunity],
    pub existing_goals: &'a [Goal],
    pub max_goals: usize,
}

#[derive(Serialize)]
struct LearningContext {
    goal: String,
    success: bool,
    test_results: Option<String>,
    review: Option<String>,
}

#[derive(Serialize)]
struct GoalSummary<'a> {
    id: &'a str,
    description: &'a str,
}

/// Template sources (built-in or overridden) plus a shared environment.
pub struct PromptRenderer {
    env: Environment<'static>,
    sources: BTreeMap<PromptKind, String>,
}

impl PromptRenderer {
    /// Renderer using only the built-in templates.
    pub fn builtin() -> Self {
        let sources = PromptKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.builtin().to_string()))
            .collect();
        Self {
            env: Environment::new(),
            sources,
        }
    }

    /// Renderer honoring overrides in `prompts_dir`. Every template is
    /// compiled once so syntax errors surface at startup.
    pub fn load(prompts_dir: Option<&Path>) -> Result<Self> {
        let mut renderer = Self::builtin();
        if let Some(dir) = prompts_dir {
            for kind in PromptKind::ALL {
                let path = dir.join(format!("{}.md", kind.name()));
                if path.is_file() {
                    let source = fs::read_to_string(&path)
                        .with_context(|| format!("read prompt template {}", path.display()))?;
                    info!(template = kind.name(), path = %path.display(), "using prompt override");
                    renderer.sources.insert(kind, source);
                }
            }
        }
        for (kind, source) in &renderer.sources {
            renderer
                .env
                .template_from_str(source)
                .with_context(|| format!("compile prompt template '{}'", kind.name()))?;
        }
        Ok(renderer)
    }

    fn render(&self, kind: PromptKind, ctx: minijinja::Value) -> Result<String> {
        let source = self
            .sources
            .get(&kind)
            .map_or_else(|| kind.builtin(), String::as_str);
        let rendered = self
            .env
            .render_str(source, ctx)
            .with_context(|| format!("render prompt '{}'", kind.name()))?;
        debug!(template = kind.name(), bytes = rendered.len(), "prompt rendered");
        Ok(rendered)
    }

    pub fn identify(&self, input: &IdentifyPrompt<'_>) -> Result<String> {
        let suggested_approach = input
            .goal
            .metadata
            .get("suggested_approach")
            .and_then(|v| v.as_str());
        self.render(
            PromptKind::Identify,
            context! {
                goal_id => &input.goal.id,
                goal_description => input.goal.description.trim(),
                priority => input.goal.priority.as_str(),
                suggested_approach => suggested_approach,
                project_structure => input.project_structure.trim_end(),
            },
        )
    }

    pub fn refine(&self, input: &RefinePrompt<'_>) -> Result<String> {
        let learning: Vec<LearningContext> = input
            .learning
            .iter()
            .map(|entry| LearningContext {
                goal: truncate(&entry.goal, LEARNING_FIELD_LIMIT),
                success: entry.success,
                test_results: entry
                    .test_results
                    .as_deref()
                    .and_then(|t| t.lines().next())
                    .map(|t| truncate(t, LEARNING_FIELD_LIMIT)),
                review: entry
                    .review
                    .as_deref()
                    .map(|r| truncate(r.trim(), LEARNING_FIELD_LIMIT)),
            })
            .collect();
        self.render(
            PromptKind::Refine,
            context! {
                goal_description => input.goal.description.trim(),
                todos => input.todos,
                current_code => input.current_code,
                learning => learning,
                previous_errors => input.previous_errors,
            },
        )
    }

    pub fn review(&self, input: &ReviewPrompt<'_>) -> Result<String> {
        let output = input.test_output.trim();
        self.render(
            PromptKind::Review,
            context! {
                goal_description => input.goal.description.trim(),
                todos => input.todos,
                patch => input.patch.trim_end(),
                test_summary => input.test_summary,
                test_output => (!output.is_empty()).then(|| truncate(output, REVIEW_TEST_OUTPUT_LIMIT)),
            },
        )
    }

    pub fn goal_generation(&self, input: &GoalGenerationPrompt<'_>) -> Result<String> {
        let existing: Vec<GoalSummary<'_>> = input
            .existing_goals
            .iter()
            .map(|g| GoalSummary {
                id: &g.id,
                description: &g.description,
            })
            .collect();
        self.render(
            PromptKind::GoalGeneration,
            context! {
                metrics => input.metrics,
                opportunities => input.opportunities,
                existing_goals => existing,
                max_goals => input.max_goals,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ChangeKind;

    fn todo() -> Todo {
        Todo {
            file_path: "src/lib.rs".to_string(),
            change_type: ChangeKind::Modify,
            description: "add foo".to_string(),
            line_start: Some(3),
            line_end: Some(7),
        }
    }

    #[test]
    fn builtin_templates_compile() {
        PromptRenderer::load(None).expect("builtin templates");
    }

    #[test]
    fn identify_includes_goal_and_structure() {
        let renderer = PromptRenderer::builtin();
        let goal = Goal::new("g1", "add function foo");
        let prompt = renderer
            .identify(&IdentifyPrompt {
                goal: &goal,
                project_structure: "src/\n  lib.rs\n",
            })
            .expect("render");
        assert!(prompt.contains("add function foo"));
        assert!(prompt.contains("  lib.rs"));
        assert!(prompt.contains("(g1, priority medium)"));
    }

    #[test]
    fn refine_lists_todos_errors_and_learning() {
        let renderer = PromptRenderer::builtin();
        let goal = Goal::new("g1", "add function foo");
        let learning = vec![LearningEntry {
            goal: "earlier goal".to_string(),
            patch: None,
            test_results: Some("failed (exit code 1)\nlots of output".to_string()),
            review: None,
            success: false,
        }];
        let errors = vec!["attempt 1: review: change rejected: tests failed".to_string()];
        let prompt = renderer
            .refine(&RefinePrompt {
                goal: &goal,
                todos: &[todo()],
                current_code: "### src/lib.rs\npub fn a() {}\n",
                learning: &learning,
                previous_errors: &errors,
            })
            .expect("render");
        assert!(prompt.contains("`src/lib.rs` (modify, lines 3-7): add foo"));
        assert!(prompt.contains("attempt 1: review: change rejected"));
        assert!(prompt.contains("rejected: earlier goal (tests: failed (exit code 1))"));
        assert!(!prompt.contains("lots of output"));
        assert!(prompt.contains("pub fn a() {}"));
    }

    #[test]
    fn review_omits_empty_test_output() {
        let renderer = PromptRenderer::builtin();
        let goal = Goal::new("g1", "add function foo");
        let prompt = renderer
            .review(&ReviewPrompt {
                goal: &goal,
                todos: &[todo()],
                patch: "--- a/x\n+++ b/x\n",
                test_summary: "passed (exit code 0)",
                test_output: "  ",
            })
            .expect("render");
        assert!(prompt.contains("## Test results: passed (exit code 0)"));
        assert!(!prompt.contains("```\n\n```"));
    }

    #[test]
    fn override_directory_replaces_template() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("identify.md"), "custom {{ goal_id }}").expect("write");
        let renderer = PromptRenderer::load(Some(temp.path())).expect("load");
        let goal = Goal::new("g9", "x");
        let prompt = renderer
            .identify(&IdentifyPrompt {
                goal: &goal,
                project_structure: "",
            })
            .expect("render");
        assert_eq!(prompt, "custom g9");
    }

    #[test]
    fn broken_override_fails_at_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("review.md"), "{% if %}").expect("write");
        assert!(PromptRenderer::load(Some(temp.path())).is_err());
    }
}
