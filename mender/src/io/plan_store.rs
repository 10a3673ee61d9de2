//! Plan document storage (`.mender/plan.md`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::plan::{self, PLAN_TEMPLATE, Task};
use crate::io::fsutil::write_atomic;

/// Handle to the markdown checklist on disk.
///
/// Nothing is cached: every call re-reads the document so edits made by the
/// operator between passes are picked up.
#[derive(Debug, Clone)]
pub struct PlanStore {
    path: PathBuf,
}

impl PlanStore {
    /// Open the plan at `path`, writing the template when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            info!(path = %path.display(), "plan missing, writing template");
            write_atomic(&path, PLAN_TEMPLATE)
                .with_context(|| format!("write plan template {}", path.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All task lines in document order. An unreadable plan loads as empty.
    pub fn load(&self) -> Vec<Task> {
        match self.read() {
            Some(document) => plan::parse_tasks(&document),
            None => Vec::new(),
        }
    }

    pub fn open_tasks(&self) -> Vec<Task> {
        match self.read() {
            Some(document) => plan::open_tasks(&document),
            None => Vec::new(),
        }
    }

    /// Mark the first open task whose text equals `task` as done.
    ///
    /// Returns `Ok(false)` when nothing matched or the document could not be
    /// read; an unreadable plan is never overwritten.
    pub fn mark_done(&self, task: &str) -> Result<bool> {
        let Some(document) = self.read() else {
            return Ok(false);
        };
        match plan::mark_done(&document, task) {
            Some(updated) => {
                write_atomic(&self.path, &updated)
                    .with_context(|| format!("update plan {}", self.path.display()))?;
                info!(task, "plan task marked done");
                Ok(true)
            }
            None => {
                debug!(task, "no open plan task matched");
                Ok(false)
            }
        }
    }

    fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(document) => Some(document),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    err = %err,
                    "plan unreadable, treating as empty"
                );
                None
            }
        }
    }
}
