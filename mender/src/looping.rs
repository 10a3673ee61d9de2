//! Repeated heal passes for `mender loop`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::heal::{HealOutcome, HealReport, Healer};
use crate::io::deploy::{DeployHook, DeployOutcome};
use crate::io::proposer::Proposer;
use crate::io::steps::StepRunner;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Cooperative interrupt flag shared with the Ctrl+C handler.
///
/// Checked between steps, before proposal calls and while sleeping. A running
/// child process is never killed because of it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a Ctrl+C handler that raises this flag. A second Ctrl+C exits
    /// the process immediately.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = Arc::clone(&self.flag);
        ctrlc::set_handler(move || {
            if flag.swap(true, Ordering::SeqCst) {
                std::process::exit(crate::exit_codes::INTERRUPTED);
            }
            eprintln!("mender: stopping after the current step (Ctrl+C again to abort)");
        })
        .context("install Ctrl+C handler")
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless stopped first. Returns `false` when the
    /// sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Run the deploy hook after a successful pass. Failures are reported only.
pub fn deploy_after_success(hook: &dyn DeployHook) -> Option<DeployOutcome> {
    match hook.deploy() {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "deploy hook could not run");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub delay: Duration,
    /// Stop after this many successful passes; `None` runs until failure or
    /// interrupt.
    pub max_passes: Option<u32>,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone)]
pub enum LoopStop {
    /// A pass ended in a terminal failure.
    Failed(HealReport),
    Interrupted,
    MaxPasses,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub passes: u32,
    pub stop: LoopStop,
}

/// Run heal passes until one fails terminally, the stop signal fires, or
/// `max_passes` successful passes have run. Sleeps `delay` between passes.
pub fn run_loop<R: StepRunner, P: Proposer, F: FnMut(&HealReport)>(
    healer: &Healer<'_, R, P>,
    deploy: Option<&dyn DeployHook>,
    config: &LoopConfig,
    mut on_pass: F,
) -> Result<LoopOutcome> {
    let mut passes = 0u32;
    loop {
        let report = healer.run_pass()?;
        passes += 1;
        on_pass(&report);
        match &report.outcome {
            HealOutcome::Succeeded => {
                if let Some(hook) = deploy {
                    deploy_after_success(hook);
                }
            }
            HealOutcome::Failed { .. } => {
                return Ok(LoopOutcome {
                    passes,
                    stop: LoopStop::Failed(report),
                });
            }
            HealOutcome::Interrupted => {
                return Ok(LoopOutcome {
                    passes,
                    stop: LoopStop::Interrupted,
                });
            }
        }
        if config.max_passes.is_some_and(|max| passes >= max) {
            return Ok(LoopOutcome {
                passes,
                stop: LoopStop::MaxPasses,
            });
        }
        info!(delay_secs = config.delay.as_secs(), "pass succeeded, sleeping");
        if !healer.stop.sleep(config.delay) {
            return Ok(LoopOutcome {
                passes,
                stop: LoopStop::Interrupted,
            });
        }
    }
}
