//! Error log and brain documents fed back into future fix requests.
//!
//! Both documents are owned by the operator as much as by mender, so loading
//! is forgiving: a missing or damaged document degrades to empty defaults with
//! a warning instead of failing the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::text::tail_chars;
use crate::io::fsutil::write_json_atomic;

/// Maximum characters of `details` kept per record (the end of the log).
pub const ERROR_DETAILS_MAX_CHARS: usize = 8_000;
/// Records kept in the error log; older entries are evicted first.
pub const ERROR_LOG_CAPACITY: usize = 30;
/// Successful examples rendered into a prompt.
pub const MAX_EXAMPLES: usize = 3;
/// Recent errors rendered into a prompt, newest first.
pub const MAX_RENDERED_ERRORS: usize = 5;
const RENDERED_ERROR_CHARS: usize = 1_200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub ts: String,
    pub source: String,
    pub step: String,
    pub details: String,
}

/// Bounded FIFO of recent failures (`.mender/errors.json`).
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records oldest first. Accepts a bare array or the legacy
    /// `{"errors": [...]}` wrapper; anything else loads as empty.
    pub fn load(&self) -> Vec<ErrorRecord> {
        let Some(value) = read_json_value(&self.path) else {
            return Vec::new();
        };
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("errors") {
                Some(Value::Array(items)) => items,
                _ => {
                    warn!(
                        path = %self.path.display(),
                        "error log has unexpected shape, treating as empty"
                    );
                    return Vec::new();
                }
            },
            _ => {
                warn!(
                    path = %self.path.display(),
                    "error log has unexpected shape, treating as empty"
                );
                return Vec::new();
            }
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<ErrorRecord>(item) {
                Ok(record) => Some(record),
                Err(err) => {
                    debug!(err = %err, "dropping malformed error record");
                    None
                }
            })
            .collect()
    }

    /// Append a record, keep the newest [`ERROR_LOG_CAPACITY`], write atomically.
    pub fn record_error(&self, source: &str, step: &str, details: &str) -> Result<()> {
        let mut records = self.load();
        records.push(ErrorRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            source: source.to_string(),
            step: step.to_string(),
            details: tail_chars(details, ERROR_DETAILS_MAX_CHARS).to_string(),
        });
        if records.len() > ERROR_LOG_CAPACITY {
            let excess = records.len() - ERROR_LOG_CAPACITY;
            records.drain(..excess);
        }
        write_json_atomic(&self.path, &records)
            .with_context(|| format!("write error log {}", self.path.display()))?;
        debug!(source, step, kept = records.len(), "error recorded");
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessfulExample {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file: String,
}

/// Operator-written guidance (`.mender/brain.json`). Read-only to mender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Brain {
    pub repo_laws: Vec<String>,
    pub file_laws: BTreeMap<String, Vec<String>>,
    pub error_patterns: Vec<String>,
    pub successful_examples: Vec<SuccessfulExample>,
}

impl Brain {
    pub fn is_empty(&self) -> bool {
        self.repo_laws.is_empty()
            && self.file_laws.is_empty()
            && self.error_patterns.is_empty()
            && self.successful_examples.is_empty()
    }
}

/// Load the brain. Never fails: each field that is missing or has the wrong
/// shape falls back to empty on its own.
pub fn load_brain(path: &Path) -> Brain {
    let Some(Value::Object(mut map)) = read_json_value(path) else {
        return Brain::default();
    };
    Brain {
        repo_laws: take_field(&mut map, "repo_laws", path),
        file_laws: take_field(&mut map, "file_laws", path),
        error_patterns: take_field(&mut map, "error_patterns", path),
        successful_examples: take_field(&mut map, "successful_examples", path),
    }
}

fn take_field<T: DeserializeOwned + Default>(
    map: &mut serde_json::Map<String, Value>,
    key: &str,
    path: &Path,
) -> T {
    let Some(value) = map.remove(key) else {
        return T::default();
    };
    serde_json::from_value(value).unwrap_or_else(|err| {
        warn!(
            path = %path.display(),
            field = key,
            err = %err,
            "brain field malformed, using empty"
        );
        T::default()
    })
}

fn read_json_value(path: &Path) -> Option<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "document unreadable, treating as empty");
            return None;
        }
    };
    if contents.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                path = %path.display(),
                err = %err,
                "document is not valid JSON, treating as empty"
            );
            None
        }
    }
}

/// Render brain guidance and recent errors as a prompt section.
///
/// Returns an empty string when there is nothing to say.
pub fn render_memory_context(brain: &Brain, errors: &[ErrorRecord]) -> String {
    if brain.is_empty() && errors.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    if !brain.repo_laws.is_empty() {
        out.push_str("Repository laws:\n");
        for law in &brain.repo_laws {
            out.push_str(&format!("- {law}\n"));
        }
        out.push('\n');
    }
    if !brain.file_laws.is_empty() {
        out.push_str("File laws:\n");
        for (file, laws) in &brain.file_laws {
            out.push_str(&format!("- {file}:\n"));
            for law in laws {
                out.push_str(&format!("    - {law}\n"));
            }
        }
        out.push('\n');
    }
    if !brain.error_patterns.is_empty() {
        out.push_str("Known error patterns (do not repeat these):\n");
        for pattern in &brain.error_patterns {
            out.push_str(&format!("- {pattern}\n"));
        }
        out.push('\n');
    }
    if !errors.is_empty() {
        out.push_str("Recent errors, newest first:\n");
        for record in errors.iter().rev().take(MAX_RENDERED_ERRORS) {
            out.push_str(&format!(
                "- [{}] {} / {}:\n{}\n",
                record.ts,
                record.source,
                record.step,
                indent(tail_chars(record.details.trim_end(), RENDERED_ERROR_CHARS))
            ));
        }
        out.push('\n');
    }
    if !brain.successful_examples.is_empty() {
        out.push_str("Successful edits to learn from:\n");
        for example in brain.successful_examples.iter().take(MAX_EXAMPLES) {
            let description = if example.description.is_empty() {
                "Example"
            } else {
                &example.description
            };
            let file = if example.file.is_empty() {
                "N/A"
            } else {
                &example.file
            };
            out.push_str(&format!("- {description}\n  File: {file}\n"));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
