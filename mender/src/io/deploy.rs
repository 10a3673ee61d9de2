//! Deployment hook run after a successful pass.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::text::tail_chars;
use crate::io::process::{command_from_argv, run_command_with_timeout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
}

pub trait DeployHook {
    fn deploy(&self) -> Result<DeployOutcome>;
}

/// Runs the configured deploy argv in the repository root.
#[derive(Debug, Clone)]
pub struct CommandDeployHook {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl DeployHook for CommandDeployHook {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn deploy(&self) -> Result<DeployOutcome> {
        info!(command = %self.command.join(" "), "running deploy hook");
        let cmd = command_from_argv(&self.command, &self.workdir)?;
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;
        let outcome = DeployOutcome {
            success: output.success(),
            exit_code: output.exit_code(),
            output: output.combined(),
        };
        if outcome.success {
            info!("deploy hook succeeded");
        } else {
            warn!(
                exit_code = ?outcome.exit_code,
                timed_out = output.timed_out,
                tail = %tail_chars(outcome.output.trim_end(), 500),
                "deploy hook failed"
            );
        }
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn reports_failure_without_erroring() {
        let temp = tempfile::tempdir().expect("tempdir");
        let hook = CommandDeployHook {
            command: vec!["sh".to_string(), "-c".to_string(), "echo nope; exit 9".to_string()],
            workdir: temp.path().to_path_buf(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1_000,
        };
        let outcome = hook.deploy().expect("deploy");
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(9));
        assert_eq!(outcome.output, "nope\n");
    }
}
