//! Shared deterministic types for mender core logic.
//!
//! These types define stable contracts between the step runner, the proposer,
//! the applier and the retry controller. They carry no I/O handles.

use serde::{Deserialize, Serialize};

/// One named external command in the verification pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub command: Vec<String>,
    /// Advisory steps (`required = false`) are reported but never stop the pipeline.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Step {
    pub fn new(name: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            required: true,
        }
    }

    /// Command rendered for logs and prompts.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

/// Outcome of executing a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// `None` when the process was killed (timeout, signal) or never spawned.
    pub exit_code: Option<i32>,
    /// Combined stdout followed by stderr.
    pub output: String,
    pub success: bool,
    pub timed_out: bool,
}

impl StepResult {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            output: output.into(),
            success: true,
            timed_out: false,
        }
    }

    pub fn failed(exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            success: false,
            timed_out: false,
        }
    }
}

/// The first failing required step of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl StepFailure {
    pub fn from_result(step: &Step, result: &StepResult) -> Self {
        Self {
            step: step.name.clone(),
            command: step.command.clone(),
            exit_code: result.exit_code,
            output: result.output.clone(),
        }
    }
}

/// A single literal substitution or append proposed for one file.
///
/// An empty `before` is the append sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edit {
    pub file: String,
    pub before: String,
    pub after: String,
}

impl Edit {
    pub fn is_append(&self) -> bool {
        self.before.is_empty()
    }
}

/// The structured response of the proposer: `{"edits": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditBatch {
    pub edits: Vec<Edit>,
}

/// Why an edit was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Target matched a deny prefix, or escaped the repository root.
    Denied,
    /// Target matched no allow prefix.
    OutOfScope,
    /// Target file does not exist.
    Missing,
    /// `before` was not found in a markup/template file; appending is unsafe.
    MarkupNoMatch,
    /// Reading, backing up or writing the file failed.
    Io(String),
}

/// What happened to one edit of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EditStatus {
    /// First occurrence of `before` was replaced.
    Replaced,
    /// `before` was empty; `after` was appended.
    Appended,
    /// `before` was not found; `after` was appended as a fallback.
    AppendedFallback,
    Skipped(SkipReason),
}

impl EditStatus {
    pub fn is_applied(&self) -> bool {
        !matches!(self, EditStatus::Skipped(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub file: String,
    #[serde(flatten)]
    pub status: EditStatus,
}

/// Per-edit outcomes of one batch, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub outcomes: Vec<EditOutcome>,
}

impl ApplyReport {
    /// True when at least one edit changed (or was allowed to change) a file.
    pub fn applied_any(&self) -> bool {
        self.outcomes.iter().any(|o| o.status.is_applied())
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_applied())
            .count()
    }
}
