//! Patch proposer client.
//!
//! The [`Proposer`] trait decouples the heal loop from the text-generation
//! backend. Two backends ship: [`CommandProposer`] spawns a CLI such as
//! `codex exec` and [`HttpProposer`] talks to an OpenAI-compatible
//! chat-completions endpoint. Tests use scripted proposers that return canned
//! replies without any network or process.
//!
//! Whatever the backend, the reply must be exactly one edit batch; anything
//! else becomes a [`ProposalError`] and the attempt is a no-fix.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::text::tail_chars;
use crate::core::types::EditBatch;
use crate::io::config::{MenderConfig, ProposerBackend, ProposerConfig};
use crate::io::fsutil::write_atomic;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// JSON Schema of the only accepted reply shape.
pub const EDIT_BATCH_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "EditBatch",
  "type": "object",
  "additionalProperties": false,
  "required": ["edits"],
  "properties": {
    "edits": {
      "type": "array",
      "items": {
        "type": "object",
        "additionalProperties": false,
        "required": ["file", "before", "after"],
        "properties": {
          "file": { "type": "string" },
          "before": { "type": "string" },
          "after": { "type": "string" }
        }
      }
    }
  }
}
"#;

const SYSTEM_MESSAGE: &str = "You propose literal source edits for a software repository. \
Reply with a single JSON object of the form {\"edits\": [{\"file\": ..., \"before\": ..., \"after\": ...}]} and nothing else.";

/// Why a proposal produced no usable edit batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("proposer unavailable: {0}")]
    Transport(String),
    #[error("proposer timed out after {0:?}")]
    Timeout(Duration),
    #[error("reply is not valid JSON: {0}")]
    Malformed(String),
    #[error("reply does not match the edit batch schema: {0}")]
    Schema(String),
    #[error("reply contains no edits")]
    NoEdits,
}

#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub prompt: String,
}

/// Abstraction over proposal backends. Returns the raw reply text.
///
/// Implementations may return a [`ProposalError`] wrapped in `anyhow` to keep
/// its kind (e.g. [`ProposalError::Timeout`]); any other error is a transport
/// failure.
pub trait Proposer {
    fn propose(&self, request: &ProposalRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    Edits(EditBatch),
    NoFix(ProposalError),
}

/// One proposal call: the raw reply (when there was one) and its verdict.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub raw_response: Option<String>,
    pub outcome: ProposalOutcome,
}

/// Submit `request` exactly once and validate the reply.
#[instrument(skip_all, fields(prompt_bytes = request.prompt.len()))]
pub fn request_edits<P: Proposer>(proposer: &P, request: &ProposalRequest) -> Proposal {
    let raw = match proposer.propose(request) {
        Ok(raw) => raw,
        Err(err) => {
            let error = match err.downcast::<ProposalError>() {
                Ok(typed) => typed,
                Err(other) => ProposalError::Transport(format!("{other:#}")),
            };
            warn!(err = %error, "proposal failed");
            return Proposal {
                raw_response: None,
                outcome: ProposalOutcome::NoFix(error),
            };
        }
    };
    let outcome = match parse_edit_batch(&raw) {
        Ok(batch) => {
            info!(edits = batch.edits.len(), "proposal received");
            ProposalOutcome::Edits(batch)
        }
        Err(error) => {
            warn!(err = %error, "proposal rejected");
            ProposalOutcome::NoFix(error)
        }
    };
    Proposal {
        raw_response: Some(raw),
        outcome,
    }
}

/// Strictly parse a reply into an [`EditBatch`].
///
/// Surrounding whitespace is tolerated; code fences and prose are not.
pub fn parse_edit_batch(raw: &str) -> Result<EditBatch, ProposalError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|err| ProposalError::Malformed(err.to_string()))?;
    validate_schema(&value)?;
    let batch: EditBatch = serde_json::from_value(value)
        .map_err(|err| ProposalError::Schema(err.to_string()))?;
    if batch.edits.is_empty() {
        return Err(ProposalError::NoEdits);
    }
    Ok(batch)
}

fn validate_schema(value: &Value) -> Result<(), ProposalError> {
    let schema: Value = serde_json::from_str(EDIT_BATCH_SCHEMA)
        .map_err(|err| ProposalError::Schema(format!("invalid built-in schema: {err}")))?;
    let compiled = validator_for(&schema)
        .map_err(|err| ProposalError::Schema(format!("invalid built-in schema: {err}")))?;
    if compiled.is_valid(value) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(ProposalError::Schema(messages.join("; ")))
}

/// Write the edit batch schema where CLI proposers can read it.
pub fn write_schema(path: &Path) -> Result<()> {
    write_atomic(path, EDIT_BATCH_SCHEMA)
        .with_context(|| format!("write edit batch schema {}", path.display()))
}

/// Proposer that spawns a configured command with the prompt on stdin.
///
/// `{schema}` and `{output}` in the argv are replaced with the schema and
/// response file paths. When `{output}` is used the reply is read from that
/// file, otherwise from stdout.
#[derive(Debug, Clone)]
pub struct CommandProposer {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub schema_path: PathBuf,
    pub output_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandProposer {
    fn argv(&self) -> Vec<String> {
        let schema = self.schema_path.display().to_string();
        let output = self.output_path.display().to_string();
        self.command
            .iter()
            .map(|arg| arg.replace("{schema}", &schema).replace("{output}", &output))
            .collect()
    }

    fn uses_output_file(&self) -> bool {
        self.command.iter().any(|arg| arg.contains("{output}"))
    }
}

impl Proposer for CommandProposer {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn propose(&self, request: &ProposalRequest) -> Result<String> {
        let argv = self.argv();
        info!(
            program = %argv.first().map(String::as_str).unwrap_or_default(),
            "starting proposer command"
        );
        if !self.schema_path.exists() {
            write_schema(&self.schema_path)?;
        }
        if self.output_path.exists() {
            fs::remove_file(&self.output_path).with_context(|| {
                format!("remove stale response {}", self.output_path.display())
            })?;
        }
        let cmd = command_from_argv(&argv, &self.workdir)?;
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run proposer command")?;

        if output.timed_out {
            return Err(ProposalError::Timeout(self.timeout).into());
        }
        if !output.success() {
            warn!(exit_code = ?output.exit_code(), "proposer command failed");
            return Err(anyhow!(
                "proposer command exited with {:?}: {}",
                output.exit_code(),
                tail_chars(output.combined().trim(), 2_000)
            ));
        }
        if self.uses_output_file() {
            let reply = fs::read_to_string(&self.output_path).with_context(|| {
                format!("read proposer response {}", self.output_path.display())
            })?;
            debug!(bytes = reply.len(), "read proposer response file");
            return Ok(reply);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Proposer that posts to an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpProposer {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout: Duration,
}

impl HttpProposer {
    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": prompt },
            ],
        })
    }
}

impl Proposer for HttpProposer {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, model = %self.model))]
    fn propose(&self, request: &ProposalRequest) -> Result<String> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| anyhow!("environment variable {} is not set", self.api_key_env))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build http client")?;
        info!("posting proposal request");
        let response = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(&request.prompt))
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| -> anyhow::Error {
                if err.is_timeout() {
                    ProposalError::Timeout(self.timeout).into()
                } else {
                    anyhow!(err).context("proposal request")
                }
            })?;
        let body: Value = response.json().context("decode chat completion")?;
        extract_message_content(&body).ok_or_else(|| {
            ProposalError::Malformed("chat completion has no message content".to_string()).into()
        })
    }
}

fn extract_message_content(body: &Value) -> Option<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The backend selected in config.
#[derive(Debug, Clone)]
pub enum ConfiguredProposer {
    Command(CommandProposer),
    Http(HttpProposer),
}

impl ConfiguredProposer {
    pub fn from_config(root: &Path, cfg: &MenderConfig) -> Self {
        let proposer: &ProposerConfig = &cfg.proposer;
        match proposer.backend {
            ProposerBackend::Command => Self::Command(CommandProposer {
                command: proposer.command.clone(),
                workdir: root.to_path_buf(),
                schema_path: root.join(&cfg.paths.schema),
                output_path: root.join(&cfg.paths.response),
                timeout: cfg.proposer_timeout(),
                output_limit_bytes: cfg.output_limit_bytes,
            }),
            ProposerBackend::Http => Self::Http(HttpProposer {
                endpoint: proposer.endpoint.clone(),
                model: proposer.model.clone(),
                api_key_env: proposer.api_key_env.clone(),
                timeout: cfg.proposer_timeout(),
            }),
        }
    }
}

impl Proposer for ConfiguredProposer {
    fn propose(&self, request: &ProposalRequest) -> Result<String> {
        match self {
            Self::Command(proposer) => proposer.propose(request),
            Self::Http(proposer) => proposer.propose(request),
        }
    }
}
