//! Retry controller: the single state machine behind heal passes and
//! feature tasks.
//!
//! ```text
//! RunningPlan --passed--> Succeeded
//! RunningPlan --failed--> AwaitingPatch{1}
//! AwaitingPatch{n} --no patch--> FailedTerminal(NoPatch)
//! AwaitingPatch{n} --applied--> ReVerifying{n}
//! ReVerifying{n} --passed--> Succeeded
//! ReVerifying{n} --failed--> AwaitingPatch{n+1}   (n <= retry_limit)
//! ReVerifying{n} --failed--> FailedTerminal(RetriesExhausted)
//! ```

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The proposer returned nothing usable, or no edit of the batch applied.
    NoPatch,
    /// Re-verification kept failing after `1 + retry_limit` proposals.
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    RunningPlan,
    AwaitingPatch { attempt: u32 },
    ReVerifying { attempt: u32 },
    Succeeded,
    FailedTerminal { reason: TerminalReason },
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::FailedTerminal { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    PipelinePassed,
    StepFailed,
    PatchApplied,
    NoPatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in {phase:?}")]
pub struct TransitionError {
    pub phase: Phase,
    pub event: Event,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    retry_limit: u32,
    phase: Phase,
}

impl RetryController {
    /// Start by running the pipeline (heal pass).
    pub fn new(retry_limit: u32) -> Self {
        Self {
            retry_limit,
            phase: Phase::RunningPlan,
        }
    }

    /// Start by requesting a patch (feature task: the first patch implements
    /// the task, later ones fix what it broke).
    pub fn awaiting_patch(retry_limit: u32) -> Self {
        Self {
            retry_limit,
            phase: Phase::AwaitingPatch { attempt: 1 },
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Upper bound on proposal calls for one controller.
    pub fn max_proposals(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }

    pub fn advance(&mut self, event: Event) -> Result<Phase, TransitionError> {
        let next = match (self.phase, event) {
            (Phase::RunningPlan, Event::PipelinePassed) => Phase::Succeeded,
            (Phase::RunningPlan, Event::StepFailed) => Phase::AwaitingPatch { attempt: 1 },
            (Phase::AwaitingPatch { .. }, Event::NoPatch) => Phase::FailedTerminal {
                reason: TerminalReason::NoPatch,
            },
            (Phase::AwaitingPatch { attempt }, Event::PatchApplied) => {
                Phase::ReVerifying { attempt }
            }
            (Phase::ReVerifying { .. }, Event::PipelinePassed) => Phase::Succeeded,
            (Phase::ReVerifying { attempt }, Event::StepFailed) => {
                if attempt <= self.retry_limit {
                    Phase::AwaitingPatch {
                        attempt: attempt + 1,
                    }
                } else {
                    Phase::FailedTerminal {
                        reason: TerminalReason::RetriesExhausted,
                    }
                }
            }
            (phase, event) => return Err(TransitionError { phase, event }),
        };
        self.phase = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_plan_succeeds_immediately() {
        let mut ctl = RetryController::new(1);
        assert_eq!(ctl.advance(Event::PipelinePassed), Ok(Phase::Succeeded));
    }

    #[test]
    fn missing_patch_is_terminal() {
        let mut ctl = RetryController::new(2);
        ctl.advance(Event::StepFailed).expect("fail");
        assert_eq!(
            ctl.advance(Event::NoPatch),
            Ok(Phase::FailedTerminal {
                reason: TerminalReason::NoPatch
            })
        );
    }

    #[test]
    fn patched_then_passing_succeeds() {
        let mut ctl = RetryController::new(1);
        ctl.advance(Event::StepFailed).expect("fail");
        assert_eq!(
            ctl.advance(Event::PatchApplied),
            Ok(Phase::ReVerifying { attempt: 1 })
        );
        assert_eq!(ctl.advance(Event::PipelinePassed), Ok(Phase::Succeeded));
    }

    #[test]
    fn retries_are_bounded() {
        let mut ctl = RetryController::new(1);
        ctl.advance(Event::StepFailed).expect("fail");
        let mut proposals = 0;
        loop {
            match ctl.phase() {
                Phase::AwaitingPatch { .. } => {
                    proposals += 1;
                    ctl.advance(Event::PatchApplied).expect("applied");
                }
                Phase::ReVerifying { .. } => {
                    ctl.advance(Event::StepFailed).expect("still failing");
                }
                _ => break,
            }
        }
        assert_eq!(proposals, ctl.max_proposals());
        assert_eq!(
            ctl.phase(),
            Phase::FailedTerminal {
                reason: TerminalReason::RetriesExhausted
            }
        );
    }

    #[test]
    fn zero_retry_limit_allows_a_single_proposal() {
        let mut ctl = RetryController::new(0);
        ctl.advance(Event::StepFailed).expect("fail");
        ctl.advance(Event::PatchApplied).expect("applied");
        assert_eq!(
            ctl.advance(Event::StepFailed),
            Ok(Phase::FailedTerminal {
                reason: TerminalReason::RetriesExhausted
            })
        );
    }

    #[test]
    fn feature_controller_starts_awaiting_patch() {
        let ctl = RetryController::awaiting_patch(1);
        assert_eq!(ctl.phase(), Phase::AwaitingPatch { attempt: 1 });
    }

    #[test]
    fn terminal_phases_reject_events() {
        let mut ctl = RetryController::new(1);
        ctl.advance(Event::PipelinePassed).expect("pass");
        let err = ctl.advance(Event::StepFailed).expect_err("terminal");
        assert_eq!(err.phase, Phase::Succeeded);
        assert!(ctl.phase().is_terminal());
    }
}
