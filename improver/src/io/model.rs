//! Language-model clients.
//!
//! [`ModelClient`] is the seam roles call through. Two backends exist: a
//! command-line client (prompt on stdin, answer on stdout) and a blocking
//! HTTP client for the Anthropic Messages API. Tests use scripted clients.

use std::path::PathBuf;
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::config::{ModelConfig, ModelProvider};
use super::process::run_command_with_timeout;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Distinguishable model-call failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelCallError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model call timed out after {0}s")]
    Timeout(u64),
    #[error("model call failed: {0}")]
    Failed(String),
}

/// Abstraction over model backends.
pub trait ModelClient {
    /// Send `prompt` (with an optional system prompt) to `model` and return the text answer.
    fn call(&self, model: &str, prompt: &str, system: Option<&str>)
    -> Result<String, ModelCallError>;
}

/// Build the client selected by `[model].provider`.
///
/// Fails when the provider cannot be used at all (e.g. missing API key).
pub fn build_model_client(cfg: &ModelConfig, workdir: impl Into<PathBuf>) -> Result<Rc<dyn ModelClient>> {
    let client: Rc<dyn ModelClient> = match cfg.provider {
        ModelProvider::Command => Rc::new(CommandModelClient::from_config(cfg, workdir)),
        ModelProvider::Anthropic => Rc::new(AnthropicModelClient::from_config(cfg)?),
    };
    info!(provider = ?cfg.provider, model = %cfg.model_name, "model client ready");
    Ok(client)
}

/// Model client that spawns a CLI per call.
#[derive(Debug, Clone)]
pub struct CommandModelClient {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModelClient {
    pub fn new(argv: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            argv,
            workdir: workdir.into(),
            timeout,
            output_limit_bytes: 1_000_000,
        }
    }

    pub fn from_config(cfg: &ModelConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            argv: cfg.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl ModelClient for CommandModelClient {
    #[instrument(skip_all, fields(model, timeout_secs = self.timeout.as_secs()))]
    fn call(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ModelCallError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(ModelCallError::Transport("model command is empty".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|arg| arg.replace("{model}", model)))
            .current_dir(&self.workdir);

        let input = match system {
            Some(system) if !system.trim().is_empty() => format!("{}\n\n{prompt}", system.trim()),
            _ => prompt.to_string(),
        };
        debug!(prompt_bytes = input.len(), "calling model command");
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| ModelCallError::Transport(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ModelCallError::Timeout(self.timeout.as_secs()));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(ModelCallError::Failed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ModelCallError::EmptyResponse);
        }
        debug!(response_bytes = text.len(), "model command answered");
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Blocking client for the Anthropic Messages API.
pub struct AnthropicModelClient {
    api_key: String,
    url: String,
    max_tokens: u32,
    timeout: Duration,
    agent: ureq::Agent,
}

impl AnthropicModelClient {
    pub fn new(api_key: String, url: String, max_tokens: u32, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            api_key,
            url,
            max_tokens,
            timeout,
            agent,
        }
    }

    /// Read the API key from `cfg.api_key_env`.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, ModelCallError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ModelCallError::Auth(format!("environment variable {} is not set", cfg.api_key_env))
            })?;
        Ok(Self::new(
            api_key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            Duration::from_secs(cfg.timeout_secs),
        ))
    }
}

impl ModelClient for AnthropicModelClient {
    #[instrument(skip_all, fields(model))]
    fn call(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ModelCallError> {
        let body = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            system,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };
        debug!(prompt_bytes = prompt.len(), "calling messages api");
        let response = self
            .agent
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(|err| classify_http_error(err, self.timeout))?;

        let parsed: MessagesResponse = response
            .into_body()
            .read_json()
            .map_err(|err| ModelCallError::Transport(format!("parse response: {err}")))?;
        response_text(parsed)
    }
}

fn classify_http_error(err: ureq::Error, timeout: Duration) -> ModelCallError {
    match err {
        ureq::Error::StatusCode(status @ (401 | 403)) => {
            ModelCallError::Auth(format!("http status {status}"))
        }
        ureq::Error::StatusCode(status) => ModelCallError::Failed(format!("http status {status}")),
        ureq::Error::Timeout(_) => ModelCallError::Timeout(timeout.as_secs()),
        other => ModelCallError::Transport(other.to_string()),
    }
}

fn response_text(response: MessagesResponse) -> Result<String, ModelCallError> {
    let text: String = response
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(ModelCallError::EmptyResponse);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandModelClient {
        CommandModelClient::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            std::env::temp_dir(),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn command_client_feeds_prompt_and_substitutes_model() {
        let client = CommandModelClient::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf '%s:' \"$0\"; cat".to_string(),
                "{model}".to_string(),
            ],
            std::env::temp_dir(),
            Duration::from_secs(10),
        );
        let out = client
            .call("tiny-model", "the prompt", Some("be brief"))
            .expect("call");
        assert_eq!(out, "tiny-model:be brief\n\nthe prompt");
    }

    #[test]
    fn command_client_maps_failures() {
        assert_eq!(
            sh("cat >/dev/null; true").call("m", "p", None),
            Err(ModelCallError::EmptyResponse)
        );
        assert!(matches!(
            sh("echo boom >&2; exit 2").call("m", "p", None),
            Err(ModelCallError::Failed(msg)) if msg.contains("boom")
        ));
        let missing = CommandModelClient::new(
            vec!["definitely-not-a-real-model-cli".to_string()],
            std::env::temp_dir(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            missing.call("m", "p", None),
            Err(ModelCallError::Transport(_))
        ));
    }

    #[test]
    fn command_client_times_out() {
        let client = CommandModelClient::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            std::env::temp_dir(),
            Duration::from_millis(200),
        );
        assert!(matches!(
            client.call("m", "p", None),
            Err(ModelCallError::Timeout(_))
        ));
    }

    #[test]
    fn anthropic_requires_api_key() {
        let cfg = ModelConfig {
            api_key_env: "IMPROVER_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ModelConfig::default()
        };
        assert!(matches!(
            AnthropicModelClient::from_config(&cfg),
            Err(ModelCallError::Auth(_))
        ));
    }

    #[test]
    fn response_text_joins_text_blocks() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "hello "}, {"type": "tool_use"}, {"type": "text", "text": "world"}]}"#,
        )
        .expect("parse");
        assert_eq!(response_text(parsed).expect("text"), "hello world");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content": []}"#).expect("parse");
        assert_eq!(response_text(empty), Err(ModelCallError::EmptyResponse));
    }

    #[test]
    fn build_selects_command_provider() {
        let cfg = ModelConfig {
            provider: ModelProvider::Command,
            command: vec!["cat".to_string()],
            ..ModelConfig::default()
        };
        let client = build_model_client(&cfg, std::env::temp_dir()).expect("build");
        assert_eq!(client.call("m", "echoed", None).expect("call"), "echoed");
    }
}
