//! Todo parsing and validation at the identify-stage boundary.
//!
//! Models answer in one of three shapes: a single todo object, an array of
//! todos, or `{"todos": [...]}`. Every item is checked against the embedded
//! JSON Schema before it is deserialized into a typed [`Todo`].

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use regex::Regex;
use serde_json::Value;

use crate::core::response::strip_code_fences;
use crate::core::types::Todo;

const TODO_SCHEMA: &str = include_str!("../../schemas/todo.schema.json");

/// Parse and validate todos from a raw model response.
pub fn parse_todos(response: &str) -> Result<Vec<Todo>> {
    let body = strip_code_fences(response);
    let value: Value = serde_json::from_str(body).context("parse todo json")?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("todos") {
            Some(Value::Array(items)) => items,
            Some(other) => bail!("'todos' must be an array, got {}", kind_of(&other)),
            None => vec![Value::Object(map)],
        },
        other => bail!("expected a todo object or array, got {}", kind_of(&other)),
    };

    let schema: Value = serde_json::from_str(TODO_SCHEMA).context("parse todo schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid todo schema: {err}"))?;

    let mut todos = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let messages: Vec<String> = validator
            .iter_errors(&item)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("todo[{idx}] failed schema validation: {}", messages.join("; "));
        }
        let todo: Todo =
            serde_json::from_value(item).with_context(|| format!("deserialize todo[{idx}]"))?;
        validate_line_range(&todo).with_context(|| format!("todo[{idx}]"))?;
        todos.push(todo);
    }
    Ok(dedupe(todos))
}

/// Drop todos whose description matches any exclusion pattern.
///
/// Returns the kept todos and the number dropped.
pub fn filter_excluded(todos: Vec<Todo>, patterns: &[Regex]) -> (Vec<Todo>, usize) {
    let before = todos.len();
    let kept: Vec<Todo> = todos
        .into_iter()
        .filter(|todo| !patterns.iter().any(|re| re.is_match(&todo.description)))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Remove exact duplicates, keeping first occurrence order.
pub fn dedupe(todos: Vec<Todo>) -> Vec<Todo> {
    let mut out: Vec<Todo> = Vec::with_capacity(todos.len());
    for todo in todos {
        if !out.contains(&todo) {
            out.push(todo);
        }
    }
    out
}

fn validate_line_range(todo: &Todo) -> Result<()> {
    if let (Some(start), Some(end)) = (todo.line_start, todo.line_end)
        && start > end
    {
        bail!("line_start ({start}) must not exceed line_end ({end})");
    }
    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
