//! Fix-session audit log (`.mender/sessions.jsonl`): one JSON line per
//! proposal attempt.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::EditOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry<'a> {
    pub ts: String,
    pub run_id: &'a str,
    pub attempt: u32,
    /// `fix` or `feature`.
    pub objective: &'a str,
    /// Failing step, or the plan task in feature mode.
    pub step: &'a str,
    pub raw_response: Option<&'a str>,
    pub proposal_error: Option<String>,
    pub outcomes: &'a [EditOutcome],
}

/// Append one entry as a single line.
pub fn append_entry(path: &Path, entry: &SessionEntry<'_>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create session log dir {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(entry).context("serialize session entry")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open session log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append session log {}", path.display()))
}
