//! Initialization helpers for `.mender/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DEFAULT_CONFIG_PATH, MenderConfig, write_config};
use super::fsutil::write_atomic;
use super::proposer::EDIT_BATCH_SCHEMA;
use crate::core::plan::PLAN_TEMPLATE;

/// Canonical scaffold paths for a project root.
#[derive(Debug, Clone)]
pub struct MenderPaths {
    pub root: PathBuf,
    pub mender_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
    pub brain_path: PathBuf,
    pub errors_path: PathBuf,
    pub schema_path: PathBuf,
}

impl MenderPaths {
    /// Resolve paths from the defaults in [`MenderConfig`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let paths = MenderConfig::default().paths;
        Self {
            mender_dir: root.join(".mender"),
            gitignore_path: root.join(".mender/.gitignore"),
            config_path: root.join(DEFAULT_CONFIG_PATH),
            plan_path: root.join(paths.plan),
            brain_path: root.join(paths.brain),
            errors_path: root.join(paths.errors),
            schema_path: root.join(paths.schema),
            root,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing mender-owned files.
    pub force: bool,
}

/// Create `.mender/` scaffolding in `root`.
///
/// Fails if `.mender/config.toml` already exists unless `options.force` is
/// set. The plan, brain and error log keep operator content unless forced.
pub fn init_mender(root: &Path, options: &InitOptions) -> Result<MenderPaths> {
    let paths = MenderPaths::new(root);
    if paths.mender_dir.exists() && !paths.mender_dir.is_dir() {
        return Err(anyhow!("mender init: .mender exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "mender init: {} already exists (use --force to overwrite)",
            DEFAULT_CONFIG_PATH
        ));
    }

    fs::create_dir_all(&paths.mender_dir)
        .with_context(|| format!("create directory {}", paths.mender_dir.display()))?;

    write_config(&paths.config_path, &MenderConfig::default())?;
    write_atomic(&paths.gitignore_path, MENDER_GITIGNORE)?;
    write_atomic(&paths.schema_path, EDIT_BATCH_SCHEMA)?;
    write_unless_kept(&paths.plan_path, PLAN_TEMPLATE, options.force)?;
    write_unless_kept(&paths.brain_path, BRAIN_PLACEHOLDER, options.force)?;
    write_unless_kept(&paths.errors_path, ERRORS_PLACEHOLDER, options.force)?;

    Ok(paths)
}

fn write_unless_kept(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    write_atomic(path, contents)
}

const BRAIN_PLACEHOLDER: &str = "{
  \"repo_laws\": [],
  \"file_laws\": {},
  \"error_patterns\": [],
  \"successful_examples\": []
}
";
const ERRORS_PLACEHOLDER: &str = "[]\n";
const MENDER_GITIGNORE: &str = "sessions.jsonl\nbackups/\nlast_response.json\n";
