//! Autonomous goal synthesis for when the goal queue runs dry.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::RoleDeps;
use crate::core::metrics::{CodeMetrics, goals_from_opportunities, opportunities};
use crate::core::response::strip_code_fences;
use crate::core::types::{Goal, Priority};
use crate::io::model::ModelClient;
use crate::io::prompt::{GoalGenerationPrompt, PromptRenderer};
use crate::io::workspace::source_files;

/// Produces new goals from the state of the code directory.
pub trait GoalSynthesizer {
    /// New goals whose ids do not collide with `existing`.
    fn synthesize(&self, existing: &[Goal]) -> Result<Vec<Goal>>;
}

/// Asks the model for goals, seeded with code metrics; falls back to the
/// metric-derived opportunities when the model is unavailable or unhelpful.
pub struct ModelGoalSynthesizer {
    model: Rc<dyn ModelClient>,
    model_name: String,
    prompts: Rc<PromptRenderer>,
    code_dir: PathBuf,
    extensions: Vec<String>,
    max_goals: usize,
}

impl ModelGoalSynthesizer {
    pub fn new(deps: &RoleDeps) -> Self {
        Self {
            model: Rc::clone(&deps.model),
            model_name: deps.model_name().to_string(),
            prompts: Rc::clone(&deps.prompts),
            code_dir: deps.code_dir.clone(),
            extensions: deps.config.refine.extensions.clone(),
            max_goals: deps.config.engine.max_generated_goals,
        }
    }
}

impl GoalSynthesizer for ModelGoalSynthesizer {
    fn synthesize(&self, existing: &[Goal]) -> Result<Vec<Goal>> {
        let files = source_files(&self.code_dir, &self.extensions);
        let metrics = CodeMetrics::collect(files.iter().map(|f| (f.path.as_str(), f.contents.as_str())));
        let opps = opportunities(&metrics);
        info!(
            files = metrics.file_count,
            functions = metrics.function_count,
            opportunities = opps.len(),
            "code metrics collected"
        );

        let prompt = self.prompts.goal_generation(&GoalGenerationPrompt {
            metrics: &metrics,
            opportunities: &opps,
            existing_goals: existing,
            max_goals: self.max_goals,
        })?;
        let from_model = self
            .model
            .call(&self.model_name, &prompt, None)
            .map_err(anyhow::Error::from)
            .and_then(|text| parse_generated_goals(&text, existing, self.max_goals));
        match from_model {
            Ok(goals) if !goals.is_empty() => return Ok(goals),
            Ok(_) => warn!("model proposed no new goals, using metric heuristics"),
            Err(err) => warn!(err = %format!("{err:#}"), "goal generation failed, using metric heuristics"),
        }

        let known: BTreeSet<&str> = existing.iter().map(|g| g.id.as_str()).collect();
        let fallback: Vec<Goal> = goals_from_opportunities(&opps, opps.len())
            .into_iter()
            .filter(|g| !known.contains(g.id.as_str()))
            .take(self.max_goals)
            .collect();
        Ok(fallback)
    }
}

#[derive(Debug, Deserialize)]
struct ProposedGoal {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    priority: Option<String>,
}

/// Parse a JSON array (or `{"goals": [...]}`) of proposed goals.
///
/// Missing ids become `auto-<n>`; ids already in `existing` (or repeated in the
/// response) are dropped; at most `limit` goals are returned, each tagged
/// `metadata.auto_generated = true`.
pub fn parse_generated_goals(response: &str, existing: &[Goal], limit: usize) -> Result<Vec<Goal>> {
    let value: Value =
        serde_json::from_str(strip_code_fences(response)).context("parse generated goals")?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("goals") {
            Some(Value::Array(items)) => items,
            _ => bail!("expected an array of goals"),
        },
        _ => bail!("expected an array of goals"),
    };

    let mut taken: BTreeSet<String> = existing.iter().map(|g| g.id.clone()).collect();
    let mut next_auto = 1usize;
    let mut goals = Vec::new();
    for item in items {
        if goals.len() >= limit {
            break;
        }
        let proposed: ProposedGoal = match serde_json::from_value(item) {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "skipping malformed proposed goal");
                continue;
            }
        };
        if proposed.description.trim().is_empty() {
            continue;
        }
        let id = match proposed.id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty()) {
            Some(id) if taken.contains(&id) => {
                info!(goal_id = %id, "discarding proposed goal with existing id");
                continue;
            }
            Some(id) => id,
            None => loop {
                let candidate = format!("auto-{next_auto}");
                next_auto += 1;
                if !taken.contains(&candidate) {
                    break candidate;
                }
            },
        };
        let priority = match proposed.priority.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("high") => Priority::High,
            Some("low") => Priority::Low,
            _ => Priority::Medium,
        };
        let mut goal = Goal::new(id.clone(), proposed.description.trim()).with_priority(priority);
        goal.metadata
            .insert("auto_generated".to_string(), Value::Bool(true));
        taken.insert(id);
        goals.push(goal);
    }
    Ok(goals)
}
