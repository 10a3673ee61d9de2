//! Orchestration for one heal pass: verify, propose, apply, re-verify.
//!
//! The [`RetryController`] decides every transition; this module only performs
//! the side effects each phase calls for.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::retry::{Event, Phase, RetryController, TerminalReason};
use crate::core::types::{ApplyReport, EditStatus, StepFailure};
use crate::exit_codes;
use crate::io::applier::PatchApplier;
use crate::io::config::MenderConfig;
use crate::io::context::gather;
use crate::io::memory::{ErrorLog, load_brain, render_memory_context};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::proposer::{ProposalOutcome, ProposalRequest, Proposer, request_edits};
use crate::io::session_log::{SessionEntry, append_entry};
use crate::io::steps::{StepRunner, run_pipeline};
use crate::looping::StopSignal;

static RUN_SEQ: AtomicU32 = AtomicU32::new(0);

/// Timestamp-based id naming a pass's backup directory and session entries.
pub fn new_run_id() -> String {
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{seq}", Utc::now().format("%Y%m%dT%H%M%S%3fZ"))
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    Succeeded,
    Failed {
        reason: TerminalReason,
        /// Last failing required step, if the pipeline ever failed.
        failure: Option<StepFailure>,
    },
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct HealReport {
    pub run_id: String,
    pub outcome: HealOutcome,
    /// Proposal calls made during the pass.
    pub proposals: u32,
}

impl HealReport {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            HealOutcome::Succeeded => exit_codes::OK,
            HealOutcome::Interrupted => exit_codes::INTERRUPTED,
            HealOutcome::Failed { failure, .. } => failure
                .as_ref()
                .and_then(|f| f.exit_code)
                .filter(|code| *code != 0)
                .unwrap_or(exit_codes::FAILURE),
        }
    }
}

/// What a pass is trying to achieve.
#[derive(Debug, Clone, Copy)]
enum Objective<'t> {
    /// Make a failing pipeline pass again.
    Fix,
    /// Implement a plan task, then keep the pipeline green.
    Task(&'t str),
}

impl Objective<'_> {
    fn label(&self) -> &'static str {
        match self {
            Objective::Fix => "fix",
            Objective::Task(_) => "feature",
        }
    }
}

/// Collaborators for heal passes.
pub struct Healer<'a, R: StepRunner, P: Proposer> {
    pub root: &'a Path,
    pub config: &'a MenderConfig,
    pub runner: &'a R,
    pub proposer: &'a P,
    pub stop: &'a StopSignal,
}

impl<'a, R: StepRunner, P: Proposer> Healer<'a, R, P> {
    pub fn new(
        root: &'a Path,
        config: &'a MenderConfig,
        runner: &'a R,
        proposer: &'a P,
        stop: &'a StopSignal,
    ) -> Self {
        Self {
            root,
            config,
            runner,
            proposer,
            stop,
        }
    }

    /// Run the pipeline and, on failure, attempt bounded fixes.
    #[instrument(skip_all)]
    pub fn run_pass(&self) -> Result<HealReport> {
        self.drive(
            RetryController::new(self.config.retry_limit),
            Objective::Fix,
        )
    }

    /// Propose edits for `task` first, then verify and fix within the same
    /// retry bound.
    #[instrument(skip_all, fields(task = %task))]
    pub fn run_task(&self, task: &str) -> Result<HealReport> {
        self.drive(
            RetryController::awaiting_patch(self.config.retry_limit),
            Objective::Task(task),
        )
    }

    fn drive(
        &self,
        mut controller: RetryController,
        objective: Objective<'_>,
    ) -> Result<HealReport> {
        let run_id = new_run_id();
        info!(run_id = %run_id, objective = objective.label(), "pass started");
        let cfg = self.config;
        let mut applier = PatchApplier::new(
            self.root,
            cfg.root_policy(),
            cfg.apply.markup_extensions.clone(),
            self.root.join(&cfg.paths.backups).join(&run_id),
        )?;
        let error_log = ErrorLog::new(self.root.join(&cfg.paths.errors));

        let mut failure: Option<StepFailure> = None;
        let mut previous: Option<String> = None;
        let mut proposals = 0u32;

        loop {
            match controller.phase() {
                Phase::RunningPlan | Phase::ReVerifying { .. } => {
                    let report = run_pipeline(self.runner, &cfg.steps, self.stop)?;
                    if report.interrupted {
                        return Ok(self.interrupted(run_id, proposals));
                    }
                    match report.failure {
                        None => {
                            controller.advance(Event::PipelinePassed)?;
                        }
                        Some(step_failure) => {
                            if let Err(err) = error_log.record_error(
                                objective.label(),
                                &step_failure.step,
                                &step_failure.output,
                            ) {
                                warn!(err = %format!("{err:#}"), "could not record error");
                            }
                            failure = Some(step_failure);
                            controller.advance(Event::StepFailed)?;
                        }
                    }
                }
                Phase::AwaitingPatch { attempt } => {
                    if self.stop.is_stopped() {
                        return Ok(self.interrupted(run_id, proposals));
                    }
                    let prompt = self.build_prompt(
                        objective,
                        failure.as_ref(),
                        attempt,
                        controller.max_proposals(),
                        previous.as_deref(),
                        &error_log,
                    )?;
                    let proposal = request_edits(self.proposer, &ProposalRequest { prompt });
                    proposals += 1;
                    let (report, proposal_error) = match proposal.outcome {
                        ProposalOutcome::Edits(batch) => (applier.apply_batch(&batch), None),
                        ProposalOutcome::NoFix(err) => (ApplyReport::default(), Some(err)),
                    };
                    self.log_attempt(&SessionEntry {
                        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                        run_id: &run_id,
                        attempt,
                        objective: objective.label(),
                        step: match objective {
                            Objective::Task(task) => task,
                            Objective::Fix => failure.as_ref().map_or("", |f| f.step.as_str()),
                        },
                        raw_response: proposal.raw_response.as_deref(),
                        proposal_error: proposal_error.as_ref().map(ToString::to_string),
                        outcomes: &report.outcomes,
                    });
                    if report.applied_any() {
                        info!(
                            attempt,
                            applied = report.applied_count(),
                            "edits applied, re-verifying"
                        );
                        previous = Some(summarize_report(&report));
                        controller.advance(Event::PatchApplied)?;
                    } else {
                        warn!(attempt, "no edit applied");
                        controller.advance(Event::NoPatch)?;
                    }
                }
                Phase::Succeeded => {
                    info!(run_id = %run_id, proposals, "pass succeeded");
                    return Ok(HealReport {
                        run_id,
                        outcome: HealOutcome::Succeeded,
                        proposals,
                    });
                }
                Phase::FailedTerminal { reason } => {
                    warn!(run_id = %run_id, reason = ?reason, proposals, "pass failed");
                    return Ok(HealReport {
                        run_id,
                        outcome: HealOutcome::Failed { reason, failure },
                        proposals,
                    });
                }
            }
        }
    }

    fn build_prompt(
        &self,
        objective: Objective<'_>,
        failure: Option<&StepFailure>,
        attempt: u32,
        max_attempts: u32,
        previous: Option<&str>,
        error_log: &ErrorLog,
    ) -> Result<String> {
        let cfg = self.config;
        let brain = load_brain(&self.root.join(&cfg.paths.brain));
        let memory = render_memory_context(&brain, &error_log.load());
        let repo = gather(
            self.root,
            &cfg.roots.allow,
            &cfg.root_policy(),
            &cfg.context,
        );
        let task = match objective {
            Objective::Task(task) => Some(task),
            Objective::Fix => None,
        };
        PromptBuilder::new(cfg.prompt_budget_bytes)
            .build(&PromptInputs {
                task,
                failure,
                log_tail_chars: cfg.log_tail_chars,
                attempt,
                max_attempts,
                previous,
                memory: &memory,
                repo: &repo,
                allow: &cfg.roots.allow,
                deny: &cfg.roots.deny,
            })
            .context("build proposal prompt")
    }

    fn log_attempt(&self, entry: &SessionEntry<'_>) {
        let path = self.root.join(&self.config.paths.sessions);
        if let Err(err) = append_entry(&path, entry) {
            warn!(err = %format!("{err:#}"), "could not append session log");
        }
    }

    fn interrupted(&self, run_id: String, proposals: u32) -> HealReport {
        info!(run_id = %run_id, "pass interrupted");
        HealReport {
            run_id,
            outcome: HealOutcome::Interrupted,
            proposals,
        }
    }
}

/// One line per edit, for the next prompt's "previous attempt" section.
fn summarize_report(report: &ApplyReport) -> String {
    report
        .outcomes
        .iter()
        .map(|outcome| {
            let status = match &outcome.status {
                EditStatus::Replaced => "replaced".to_string(),
                EditStatus::Appended => "appended".to_string(),
                EditStatus::AppendedFallback => "appended (snippet not found)".to_string(),
                EditStatus::Skipped(reason) => format!("skipped ({reason:?})"),
            };
            format!("- {}: {status}", outcome.file)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepResult;
    use crate::test_support::{ScriptedProposer, ScriptedStepRunner, TestRepo};

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[test]
    fn green_pipeline_makes_no_proposal() {
        let repo = TestRepo::new().expect("repo");
        let config = MenderConfig::default();
        let runner = ScriptedStepRunner::always(StepResult::passed("ok"));
        let proposer = ScriptedProposer::new(Vec::new());
        let stop = StopSignal::new();
        let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
            .run_pass()
            .expect("pass");
        assert_eq!(report.outcome, HealOutcome::Succeeded);
        assert_eq!(report.proposals, 0);
        assert_eq!(report.exit_code(), exit_codes::OK);
        assert_eq!(runner.calls(), vec!["Lint", "Test", "Build"]);
    }

    #[test]
    fn failed_exit_code_falls_back_to_one() {
        let report = HealReport {
            run_id: "r".to_string(),
            outcome: HealOutcome::Failed {
                reason: TerminalReason::NoPatch,
                failure: Some(StepFailure {
                    step: "Build".to_string(),
                    command: Vec::new(),
                    exit_code: None,
                    output: String::new(),
                }),
            },
            proposals: 1,
        };
        assert_eq!(report.exit_code(), exit_codes::FAILURE);
    }

    #[test]
    fn stop_before_proposal_interrupts_pass() {
        let repo = TestRepo::new().expect("repo");
        let config = MenderConfig::default();
        let runner = ScriptedStepRunner::always(StepResult::failed(Some(1), "broken"));
        let proposer = ScriptedProposer::new(Vec::new());
        let stop = StopSignal::new();
        runner.stop_after_next_run(&stop);
        let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
            .run_pass()
            .expect("pass");
        assert_eq!(report.outcome, HealOutcome::Interrupted);
        assert_eq!(report.exit_code(), exit_codes::INTERRUPTED);
        assert_eq!(proposer.calls(), 0);
    }

    #[test]
    fn summary_names_each_edit() {
        let report = ApplyReport {
            outcomes: vec![crate::core::types::EditOutcome {
                file: "lib/a.ts".to_string(),
                status: EditStatus::AppendedFallback,
            }],
        };
        assert_eq!(
            summarize_report(&report),
            "- lib/a.ts: appended (snippet not found)"
        );
    }
}
