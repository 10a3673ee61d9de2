//! Mender configuration stored under `.mender/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::root_policy::RootPolicy;
use crate::core::types::Step;
use crate::io::fsutil::write_atomic;

pub const DEFAULT_CONFIG_PATH: &str = ".mender/config.toml";

/// Mender configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values suited to a Node/TypeScript web repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MenderConfig {
    /// Extra proposal attempts after the first fix fails re-verification.
    pub retry_limit: u32,

    /// Delay between successful passes in `mender loop`.
    pub loop_delay_secs: u64,

    /// Wall-clock limit for each pipeline step.
    pub step_timeout_secs: u64,

    /// Captured stdout/stderr per step beyond this many bytes is discarded.
    pub output_limit_bytes: usize,

    /// Characters of the failing log (from the end) sent to the proposer.
    pub log_tail_chars: usize,

    /// Maximum bytes for the prompt before droppable sections are removed.
    pub prompt_budget_bytes: usize,

    pub steps: Vec<Step>,
    pub roots: RootsConfig,
    pub apply: ApplyConfig,
    pub proposer: ProposerConfig,
    pub context: ContextConfig,
    pub deploy: DeployConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RootsConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApplyConfig {
    /// Extensions treated as structured markup/templates: a `before` snippet
    /// that is not found in these files is skipped instead of appended.
    pub markup_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposerBackend {
    /// Spawn a CLI (e.g. `codex exec`) with the prompt on stdin.
    Command,
    /// POST to an OpenAI-compatible chat-completions endpoint.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProposerConfig {
    pub backend: ProposerBackend,

    /// Command argv. `{schema}` and `{output}` are replaced with the edit
    /// batch schema path and the response file path. Without `{output}` the
    /// response is read from stdout.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key for the HTTP backend.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum files listed per allowed root.
    pub listing_limit: usize,
    /// Files (relative to the root) previewed in every request.
    pub preview_files: Vec<String>,
    pub preview_lines: usize,
    /// Number of recent commits to include; 0 disables the git probe.
    pub git_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployConfig {
    pub enabled: bool,
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// Locations of mender's durable documents, relative to the repository root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub plan: PathBuf,
    pub brain: PathBuf,
    pub errors: PathBuf,
    pub sessions: PathBuf,
    pub backups: PathBuf,
    pub schema: PathBuf,
    /// Where a command proposer writes its reply (`{output}`).
    pub response: PathBuf,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            allow: ["app/", "components/", "lib/", "src/", "prisma/", "db/", "supabase/"]
                .map(String::from)
                .to_vec(),
            deny: [
                "node_modules/",
                ".next/",
                ".turbo/",
                "dist/",
                "build/",
                "logs/",
                ".git/",
                ".mender/",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            markup_extensions: ["tsx", "jsx", "vue", "svelte", "html"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            backend: ProposerBackend::Command,
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .map(String::from)
            .to_vec(),
            timeout_secs: 5 * 60,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4.1-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            listing_limit: 200,
            preview_files: ["package.json", "tsconfig.json"].map(String::from).to_vec(),
            preview_lines: 30,
            git_history: 10,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: ["npm", "run", "deploy"].map(String::from).to_vec(),
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            plan: PathBuf::from(".mender/plan.md"),
            brain: PathBuf::from(".mender/brain.json"),
            errors: PathBuf::from(".mender/errors.json"),
            sessions: PathBuf::from(".mender/sessions.jsonl"),
            backups: PathBuf::from(".mender/backups"),
            schema: PathBuf::from(".mender/edit_batch.schema.json"),
            response: PathBuf::from(".mender/last_response.json"),
        }
    }
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            retry_limit: 1,
            loop_delay_secs: 15,
            step_timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            log_tail_chars: 16_000,
            prompt_budget_bytes: 60_000,
            steps: vec![
                Step::new("Lint", &["npm", "run", "lint"]),
                Step::new("Test", &["npm", "test"]),
                Step::new("Build", &["npm", "run", "build"]),
            ],
            roots: RootsConfig::default(),
            apply: ApplyConfig::default(),
            proposer: ProposerConfig::default(),
            context: ContextConfig::default(),
            deploy: DeployConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl MenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.log_tail_chars == 0 {
            return Err(anyhow!("log_tail_chars must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.steps.is_empty() {
            return Err(anyhow!("steps must contain at least one step"));
        }
        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(anyhow!("steps[].name must not be empty"));
            }
            if !names.insert(step.name.as_str()) {
                return Err(anyhow!("duplicate step name '{}'", step.name));
            }
            if !is_non_empty_command(&step.command) {
                return Err(anyhow!(
                    "steps '{}' command must be a non-empty array",
                    step.name
                ));
            }
        }
        if self.proposer.timeout_secs == 0 {
            return Err(anyhow!("proposer.timeout_secs must be > 0"));
        }
        match self.proposer.backend {
            ProposerBackend::Command if !is_non_empty_command(&self.proposer.command) => {
                return Err(anyhow!("proposer.command must be a non-empty array"));
            }
            ProposerBackend::Http if self.proposer.endpoint.trim().is_empty() => {
                return Err(anyhow!("proposer.endpoint must be set for the http backend"));
            }
            _ => {}
        }
        if self.deploy.enabled && !is_non_empty_command(&self.deploy.command) {
            return Err(anyhow!("deploy.command must be a non-empty array"));
        }
        if self.deploy.timeout_secs == 0 {
            return Err(anyhow!("deploy.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn root_policy(&self) -> RootPolicy {
        RootPolicy::new(self.roots.allow.clone(), self.roots.deny.clone())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn proposer_timeout(&self) -> Duration {
        Duration::from_secs(self.proposer.timeout_secs)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_secs(self.loop_delay_secs)
    }
}

fn is_non_empty_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MenderConfig::default()`.
pub fn load_config(path: &Path) -> Result<MenderConfig> {
    if !path.exists() {
        let cfg = MenderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MenderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MenderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, MenderConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = MenderConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "retry_limit = 2\n\n[[steps]]\nname = \"Check\"\ncommand = [\"cargo\", \"check\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.retry_limit, 2);
        assert_eq!(cfg.steps, vec![Step::new("Check", &["cargo", "check"])]);
        assert_eq!(cfg.roots, RootsConfig::default());
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let cfg = MenderConfig {
            steps: vec![
                Step::new("Lint", &["npm", "run", "lint"]),
                Step::new("Lint", &["npm", "run", "lint:fix"]),
            ],
            ..MenderConfig::default()
        };
        let err = cfg.validate().expect_err("duplicate");
        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn empty_step_command_is_rejected() {
        let cfg = MenderConfig {
            steps: vec![Step {
                name: "Empty".to_string(),
                command: Vec::new(),
                required: true,
            }],
            ..MenderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn enabled_deploy_needs_a_command() {
        let mut cfg = MenderConfig::default();
        cfg.deploy.enabled = true;
        cfg.deploy.command.clear();
        assert!(cfg.validate().is_err());
    }
}
