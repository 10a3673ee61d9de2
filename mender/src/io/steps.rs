//! Step runner: executes the verification pipeline one step at a time.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{Step, StepFailure, StepResult};
use crate::io::process::{command_from_argv, run_command_with_timeout};
use crate::looping::StopSignal;

pub trait StepRunner {
    fn run(&self, step: &Step) -> Result<StepResult>;
}

/// Runs each step's argv in the repository root.
#[derive(Debug, Clone)]
pub struct CommandStepRunner {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandStepRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl StepRunner for CommandStepRunner {
    #[instrument(skip_all, fields(step = %step.name))]
    fn run(&self, step: &Step) -> Result<StepResult> {
        info!(command = %step.display_command(), "running step");
        let cmd = command_from_argv(&step.command, &self.workdir)?;
        let output = match run_command_with_timeout(
            cmd,
            None,
            self.timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            // A missing tool is a failed step the operator needs to see, not a crash.
            Err(err) => {
                warn!(err = %format!("{err:#}"), "step could not be started");
                return Ok(StepResult::failed(
                    None,
                    format!("failed to start `{}`: {err:#}\n", step.display_command()),
                ));
            }
        };
        Ok(StepResult {
            exit_code: output.exit_code(),
            output: output.combined(),
            success: output.success(),
            timed_out: output.timed_out,
        })
    }
}

/// Results of one pass over the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Executed steps in order, including advisory failures.
    pub results: Vec<(String, StepResult)>,
    /// First failing required step; `None` when the pipeline passed.
    pub failure: Option<StepFailure>,
    /// Set when the stop signal fired before every step could run.
    pub interrupted: bool,
}

impl PipelineReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none() && !self.interrupted
    }
}

/// Run `steps` in order and stop at the first failing required step.
///
/// The stop signal is checked before each step; a running step is never
/// interrupted.
pub fn run_pipeline<R: StepRunner>(
    runner: &R,
    steps: &[Step],
    stop: &StopSignal,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();
    for step in steps {
        if stop.is_stopped() {
            info!(step = %step.name, "stop requested, pipeline interrupted");
            report.interrupted = true;
            return Ok(report);
        }
        let result = runner.run(step)?;
        if result.success {
            info!(step = %step.name, "step passed");
        } else if step.required {
            warn!(
                step = %step.name,
                exit_code = ?result.exit_code,
                timed_out = result.timed_out,
                "step failed"
            );
            report.failure = Some(StepFailure::from_result(step, &result));
            report.results.push((step.name.clone(), result));
            return Ok(report);
        } else {
            warn!(
                step = %step.name,
                exit_code = ?result.exit_code,
                "advisory step failed, continuing"
            );
        }
        report.results.push((step.name.clone(), result));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedStepRunner;

    fn steps() -> Vec<Step> {
        vec![
            Step::new("Lint", &["lint"]),
            Step::new("Test", &["test"]),
            Step::new("Build", &["build"]),
        ]
    }

    #[test]
    fn stops_at_first_failure() {
        let runner = ScriptedStepRunner::new(vec![
            StepResult::passed("lint ok"),
            StepResult::failed(Some(2), "test broke"),
        ]);
        let report = run_pipeline(&runner, &steps(), &StopSignal::new()).expect("pipeline");
        let failure = report.failure.expect("failure");
        assert_eq!(failure.step, "Test");
        assert_eq!(failure.exit_code, Some(2));
        assert_eq!(failure.output, "test broke");
        assert_eq!(runner.calls(), vec!["Lint", "Test"]);
    }

    #[test]
    fn advisory_failures_do_not_stop_the_pipeline() {
        let mut steps = steps();
        steps[1].required = false;
        let runner = ScriptedStepRunner::new(vec![
            StepResult::passed(""),
            StepResult::failed(Some(1), "flaky"),
            StepResult::passed(""),
        ]);
        let report = run_pipeline(&runner, &steps, &StopSignal::new()).expect("pipeline");
        assert!(report.passed());
        assert_eq!(report.results.len(), 3);
    }

    #[test]
    fn stop_signal_interrupts_between_steps() {
        let stop = StopSignal::new();
        stop.stop();
        let runner = ScriptedStepRunner::new(Vec::new());
        let report = run_pipeline(&runner, &steps(), &stop).expect("pipeline");
        assert!(report.interrupted);
        assert!(runner.calls().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn command_runner_reports_exit_code_and_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandStepRunner::new(temp.path(), Duration::from_secs(10), 10_000);
        let step = Step::new("Fail", &["sh", "-c", "echo broken >&2; exit 4"]);
        let result = runner.run(&step).expect("run");
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(4));
        assert!(result.output.contains("broken"));
    }

    #[test]
    fn missing_program_is_a_failed_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandStepRunner::new(temp.path(), Duration::from_secs(10), 10_000);
        let step = Step::new("Ghost", &["mender-test-no-such-program"]);
        let result = runner.run(&step).expect("run");
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.output.contains("failed to start"));
    }
}
