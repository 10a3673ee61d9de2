//! Patch applier: applies an edit batch under the root policy.
//!
//! Every edit produces an [`EditOutcome`]; nothing here returns an error for a
//! single bad edit. The first time a file is about to change during a run its
//! original content is copied to `<backups>/<run-id>/<path>`. Files are told
//! apart by their canonical path, so a symlinked alias shares one snapshot.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::resolve::{Resolution, is_markup_file, resolve_edit};
use crate::core::root_policy::{PathClass, RootPolicy, normalize};
use crate::core::types::{ApplyReport, Edit, EditBatch, EditOutcome, EditStatus, SkipReason};
use crate::io::fsutil::write_atomic;

#[derive(Debug)]
pub struct PatchApplier {
    root: PathBuf,
    policy: RootPolicy,
    markup_extensions: Vec<String>,
    backup_dir: PathBuf,
    backed_up: HashSet<PathBuf>,
}

impl PatchApplier {
    /// `backup_dir` is the per-run directory (already including the run id).
    pub fn new(
        root: &Path,
        policy: RootPolicy,
        markup_extensions: Vec<String>,
        backup_dir: PathBuf,
    ) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve repository root {}", root.display()))?;
        Ok(Self {
            root,
            policy,
            markup_extensions,
            backup_dir,
            backed_up: HashSet::new(),
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Apply edits in order. Later edits see the effects of earlier ones.
    pub fn apply_batch(&mut self, batch: &EditBatch) -> ApplyReport {
        let outcomes = batch
            .edits
            .iter()
            .map(|edit| {
                let status = self.apply_edit(edit);
                match &status {
                    EditStatus::Skipped(reason) => {
                        warn!(file = %edit.file, reason = ?reason, "edit skipped");
                    }
                    applied => info!(file = %edit.file, status = ?applied, "edit applied"),
                }
                EditOutcome {
                    file: edit.file.clone(),
                    status,
                }
            })
            .collect();
        ApplyReport { outcomes }
    }

    fn apply_edit(&mut self, edit: &Edit) -> EditStatus {
        match self.policy.classify(&edit.file) {
            PathClass::Allowed => {}
            PathClass::Denied => return EditStatus::Skipped(SkipReason::Denied),
            PathClass::OutOfScope => return EditStatus::Skipped(SkipReason::OutOfScope),
        }
        let Some(rel) = normalize(&edit.file) else {
            return EditStatus::Skipped(SkipReason::Denied);
        };
        let target = self.root.join(&rel);
        if !target.exists() {
            return EditStatus::Skipped(SkipReason::Missing);
        }
        let real = match target.canonicalize() {
            Ok(real) => real,
            Err(err) => return skipped_io("resolve", &err),
        };
        if !real.starts_with(&self.root) {
            warn!(
                file = %edit.file,
                resolved = %real.display(),
                "edit target escapes the repository root"
            );
            return EditStatus::Skipped(SkipReason::Denied);
        }
        if !real.is_file() {
            return EditStatus::Skipped(SkipReason::Io("not a regular file".to_string()));
        }
        let content = match fs::read_to_string(&real) {
            Ok(content) => content,
            Err(err) => return skipped_io("read", &err),
        };

        let is_markup = is_markup_file(&rel, &self.markup_extensions);
        let (updated, status) = match resolve_edit(&content, edit, is_markup) {
            Resolution::Write { content, status } => (content, status),
            Resolution::Skip(reason) => return EditStatus::Skipped(reason),
        };

        if let Err(err) = self.ensure_backup(&real, &rel, &content) {
            warn!(
                file = %rel,
                err = %format!("{err:#}"),
                "backup failed, leaving file untouched"
            );
            return EditStatus::Skipped(SkipReason::Io(format!("backup: {err:#}")));
        }
        if let Err(err) = write_atomic(&real, &updated) {
            return EditStatus::Skipped(SkipReason::Io(format!("write: {err:#}")));
        }
        status
    }

    /// Snapshot `original` once per file per run, stored under the first
    /// path that touched it. An existing snapshot is never overwritten.
    fn ensure_backup(&mut self, real: &Path, rel: &str, original: &str) -> Result<()> {
        if self.backed_up.contains(real) {
            return Ok(());
        }
        let path = self.backup_dir.join(rel);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create backup dir {}", parent.display()))?;
            }
            fs::write(&path, original)
                .with_context(|| format!("write backup {}", path.display()))?;
            debug!(file = rel, backup = %path.display(), "backup written");
        }
        self.backed_up.insert(real.to_path_buf());
        Ok(())
    }
}

fn skipped_io(action: &str, err: &std::io::Error) -> EditStatus {
    EditStatus::Skipped(SkipReason::Io(format!("{action}: {err}")))
}
