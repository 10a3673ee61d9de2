//! Repository context gathered for each proposal: file listing, key file
//! previews and recent git history.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::root_policy::RootPolicy;
use crate::core::text::head_lines;
use crate::io::config::ContextConfig;
use crate::io::process::run_command_with_timeout;

pub const GIT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const GIT_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Context sections shared by fix and feature prompts.
#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub listing: String,
    pub previews: Vec<FilePreview>,
    pub git_history: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePreview {
    pub file: String,
    pub content: String,
}

/// Collect everything a proposal needs to know about the repository.
///
/// Every probe degrades to an empty section on failure.
pub fn gather(
    root: &Path,
    allow: &[String],
    policy: &RootPolicy,
    cfg: &ContextConfig,
) -> RepoContext {
    RepoContext {
        listing: repo_listing(root, allow, policy, cfg.listing_limit),
        previews: file_previews(root, &cfg.preview_files, cfg.preview_lines),
        git_history: git_history(root, cfg.git_history, GIT_PROBE_TIMEOUT),
    }
}

/// List files under each allowed root, at most `limit` per root, skipping
/// denied directories.
pub fn repo_listing(root: &Path, allow: &[String], policy: &RootPolicy, limit: usize) -> String {
    let mut lines = Vec::new();
    for prefix in allow {
        let dir = prefix.trim_end_matches('/');
        let dir_path = root.join(dir);
        if !dir_path.is_dir() {
            lines.push(format!("- {prefix} (missing)"));
            continue;
        }
        lines.push(format!("- {prefix}"));
        let walker = WalkDir::new(&dir_path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !entry.file_type().is_dir()
                    || relative(root, entry.path()).is_none_or(|rel| !policy.denies_dir(&rel))
            });
        let mut count = 0usize;
        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative(root, entry.path()) else {
                continue;
            };
            if count >= limit {
                lines.push("  - ...".to_string());
                break;
            }
            lines.push(format!("  - {rel}"));
            count += 1;
        }
    }
    lines.join("\n")
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.to_str()?.replace('\\', "/");
    (!rel.is_empty()).then_some(rel)
}

/// First `max_lines` lines of each existing file in `files`.
pub fn file_previews(root: &Path, files: &[String], max_lines: usize) -> Vec<FilePreview> {
    files
        .iter()
        .filter_map(|file| {
            let path = root.join(file);
            if !path.is_file() {
                return None;
            }
            match fs::read_to_string(&path) {
                Ok(contents) if !contents.trim().is_empty() => Some(FilePreview {
                    file: file.clone(),
                    content: head_lines(&contents, max_lines),
                }),
                Ok(_) => None,
                Err(err) => {
                    debug!(path = %path.display(), err = %err, "skipping preview");
                    None
                }
            }
        })
        .collect()
}

/// `git log -N --oneline` for the repository, or `None` when git is
/// unavailable, the directory is not a repository, or the probe times out.
pub fn git_history(root: &Path, commits: usize, timeout: Duration) -> Option<String> {
    if commits == 0 {
        return None;
    }
    let mut cmd = Command::new("git");
    cmd.args(["log", &format!("-{commits}"), "--oneline", "--no-decorate"])
        .current_dir(root);
    let output = match run_command_with_timeout(cmd, None, timeout, GIT_OUTPUT_LIMIT_BYTES) {
        Ok(output) => output,
        Err(err) => {
            debug!(err = %format!("{err:#}"), "git history unavailable");
            return None;
        }
    };
    if output.timed_out {
        warn!("git history probe timed out");
        return None;
    }
    if !output.success() {
        return None;
    }
    let log = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!log.is_empty()).then_some(log)
}
