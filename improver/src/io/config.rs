//! Engine configuration stored in a TOML file (default `improver.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;

/// Default config file name looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "improver.toml";

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to sensible values;
/// relative paths are resolved against the directory holding the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Ordered role names; resolved through the role registry at startup.
    pub roles: Vec<String>,
    pub engine: EngineSection,
    pub model: ModelConfig,
    pub identify: IdentifyConfig,
    pub refine: RefineConfig,
    pub verify: VerifyConfig,
    pub review: ReviewConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSection {
    /// Directory the roles operate within (patches, tests, source reading).
    pub code_dir: PathBuf,
    /// Maximum attempts per goal per engine run.
    pub max_cycles: u32,
    /// Snapshot and learning-log directory.
    pub memory_path: PathBuf,
    /// Goal store file.
    pub goals_path: PathBuf,
    /// Optional directory with `<template>.md` files overriding built-in prompts.
    pub prompts_dir: Option<PathBuf>,
    /// Synthesize goals from code metrics when the queue runs dry.
    pub autonomous_goals: bool,
    /// Upper bound on goals added by one synthesis pass.
    pub max_generated_goals: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            code_dir: PathBuf::from("."),
            max_cycles: 3,
            memory_path: PathBuf::from(".improver/memory"),
            goals_path: PathBuf::from(".improver/goals.json"),
            prompts_dir: None,
            autonomous_goals: true,
            max_generated_goals: 3,
        }
    }
}

/// Which model backend to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    /// Spawn a CLI, feed the prompt on stdin, read the answer from stdout.
    Command,
    /// Call the Anthropic Messages API over HTTP.
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub model_name: String,
    /// Argv for the command provider. `{model}` is replaced by `model_name`.
    pub command: Vec<String>,
    /// Environment variable holding the API key (HTTP providers).
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Anthropic,
            model_name: "claude-sonnet-4-20250514".to_string(),
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--model".to_string(),
                "{model}".to_string(),
            ],
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            max_tokens: 4096,
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdentifyConfig {
    /// Regexes; todos whose description matches any of them are dropped.
    pub exclude_patterns: Vec<String>,
}

impl IdentifyConfig {
    pub fn compiled_patterns(&self) -> Result<Vec<Regex>> {
        self.exclude_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid exclude pattern '{p}'")))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefineConfig {
    /// Budget for source text embedded in the refine prompt.
    pub max_source_bytes: usize,
    /// Recent learning-log entries shown to the model.
    pub learning_examples: usize,
    /// File extensions read into the prompt.
    pub extensions: Vec<String>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 60_000,
            learning_examples: 3,
            extensions: ["rs", "py", "ts", "js", "go", "toml"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Test command (e.g. `["cargo","test"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: vec!["cargo".to_string(), "test".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Require an explicit model approval in addition to passing tests.
    pub require_model_approval: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            require_model_approval: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Also append log lines to this file.
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            log_file: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roles: ["identify", "refine", "verify", "review"]
                .into_iter()
                .map(String::from)
                .collect(),
            engine: EngineSection::default(),
            model: ModelConfig::default(),
            identify: IdentifyConfig::default(),
            refine: RefineConfig::default(),
            verify: VerifyConfig::default(),
            review: ReviewConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Absolute locations derived from the config and its base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    pub code_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub goals_path: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_cycles == 0 {
            return Err(anyhow!("engine.max_cycles must be > 0"));
        }
        if self.roles.is_empty() {
            return Err(anyhow!("roles must list at least one role"));
        }
        if self.model.model_name.trim().is_empty() {
            return Err(anyhow!("model.model_name must not be empty"));
        }
        if self.model.provider == ModelProvider::Command
            && (self.model.command.is_empty() || self.model.command[0].trim().is_empty())
        {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.verify.command.is_empty() || self.verify.command[0].trim().is_empty() {
            return Err(anyhow!("verify.command must be a non-empty array"));
        }
        if self.verify.timeout_secs == 0 {
            return Err(anyhow!("verify.timeout_secs must be > 0"));
        }
        if self.verify.output_limit_bytes == 0 || self.model.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        self.identify.compiled_patterns()?;
        Ok(())
    }

    /// Resolve relative paths against `base` (normally the config file's directory).
    pub fn paths(&self, base: &Path) -> EnginePaths {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        EnginePaths {
            code_dir: resolve(&self.engine.code_dir),
            memory_dir: resolve(&self.engine.memory_path),
            goals_path: resolve(&self.engine.goals_path),
            prompts_dir: self.engine.prompts_dir.as_deref().map(resolve),
            log_file: self.logging.log_file.as_deref().map(resolve),
        }
    }
}

/// Load and validate config from a TOML file. A missing file is an error.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "config file not found at {} (run `improver init`)",
            path.display()
        ));
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Directory relative config paths are resolved against.
pub fn config_base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(&temp.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("improver.toml");
        let cfg = EngineConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("improver.toml");
        fs::write(&path, "[engine]\nmax_cycles = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.engine.max_cycles, 5);
        assert_eq!(cfg.roles, EngineConfig::default().roles);
        assert_eq!(cfg.verify, VerifyConfig::default());
    }

    #[test]
    fn rejects_zero_max_cycles() {
        let mut cfg = EngineConfig::default();
        cfg.engine.max_cycles = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("max_cycles"));
    }

    #[test]
    fn rejects_bad_exclude_pattern() {
        let mut cfg = EngineConfig::default();
        cfg.identify.exclude_patterns = vec!["(".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn paths_resolve_relative_to_base() {
        let cfg = EngineConfig::default();
        let paths = cfg.paths(Path::new("/work"));
        assert_eq!(paths.code_dir, PathBuf::from("/work/."));
        assert_eq!(paths.goals_path, PathBuf::from("/work/.improver/goals.json"));
        assert_eq!(paths.prompts_dir, None);
    }
}
