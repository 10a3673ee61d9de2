//! Plan-driven feature mode for `mender features`.

use anyhow::Result;
use tracing::{info, warn};

use crate::heal::{HealOutcome, HealReport, Healer};
use crate::io::plan_store::PlanStore;
use crate::io::proposer::Proposer;
use crate::io::steps::StepRunner;

/// Reason why `run_features` stopped.
#[derive(Debug, Clone)]
pub enum FeaturesStop {
    /// No open tasks remain.
    PlanComplete,
    /// `max_tasks` tasks were completed.
    MaxTasks,
    /// A task ended in a terminal failure.
    Failed { task: String, report: HealReport },
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct FeaturesOutcome {
    pub completed: Vec<String>,
    pub stop: FeaturesStop,
}

/// Work open plan tasks in order, marking each done once the pipeline passes.
///
/// The plan is re-read before every task so operator edits take effect.
pub fn run_features<R: StepRunner, P: Proposer, F: FnMut(&str, &HealReport)>(
    healer: &Healer<'_, R, P>,
    plan: &PlanStore,
    max_tasks: Option<usize>,
    mut on_task: F,
) -> Result<FeaturesOutcome> {
    let mut completed: Vec<String> = Vec::new();
    loop {
        if max_tasks.is_some_and(|max| completed.len() >= max) {
            return Ok(FeaturesOutcome {
                completed,
                stop: FeaturesStop::MaxTasks,
            });
        }
        if healer.stop.is_stopped() {
            return Ok(FeaturesOutcome {
                completed,
                stop: FeaturesStop::Interrupted,
            });
        }
        // Skip tasks already attempted in this invocation whose line could not
        // be marked (e.g. the operator edited it mid-run).
        let Some(task) = plan
            .open_tasks()
            .into_iter()
            .find(|task| !completed.contains(&task.text))
        else {
            return Ok(FeaturesOutcome {
                completed,
                stop: FeaturesStop::PlanComplete,
            });
        };

        info!(task = %task.text, "starting plan task");
        let report = healer.run_task(&task.text)?;
        on_task(&task.text, &report);
        match report.outcome {
            HealOutcome::Succeeded => {
                if !plan.mark_done(&task.text)? {
                    warn!(task = %task.text, "task succeeded but its plan line was not found");
                }
                completed.push(task.text);
            }
            HealOutcome::Failed { .. } => {
                return Ok(FeaturesOutcome {
                    completed,
                    stop: FeaturesStop::Failed {
                        task: task.text,
                        report,
                    },
                });
            }
            HealOutcome::Interrupted => {
                return Ok(FeaturesOutcome {
                    completed,
                    stop: FeaturesStop::Interrupted,
                });
            }
        }
    }
}
