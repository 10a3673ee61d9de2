//! Test-only collaborators: scripted pipeline, proposer and deploy hook, plus
//! a scratch repository.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::types::{Step, StepResult};
use crate::io::deploy::{DeployHook, DeployOutcome};
use crate::io::proposer::{ProposalError, ProposalRequest, Proposer};
use crate::io::steps::StepRunner;
use crate::looping::StopSignal;

/// Step runner that returns canned results in call order.
///
/// Once the script runs out, the last result repeats. An empty script passes
/// every step.
pub struct ScriptedStepRunner {
    script: RefCell<VecDeque<StepResult>>,
    last: RefCell<StepResult>,
    calls: RefCell<Vec<String>>,
    stop_after: RefCell<Option<StopSignal>>,
}

impl ScriptedStepRunner {
    pub fn new(script: Vec<StepResult>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            last: RefCell::new(StepResult::passed("")),
            calls: RefCell::new(Vec::new()),
            stop_after: RefCell::new(None),
        }
    }

    /// Every step returns `result`.
    pub fn always(result: StepResult) -> Self {
        Self::new(vec![result])
    }

    /// Step names in the order they were run.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Raise `stop` right after the next step finishes, as a Ctrl+C during
    /// that step would.
    pub fn stop_after_next_run(&self, stop: &StopSignal) {
        *self.stop_after.borrow_mut() = Some(stop.clone());
    }
}

impl StepRunner for ScriptedStepRunner {
    fn run(&self, step: &Step) -> Result<StepResult> {
        self.calls.borrow_mut().push(step.name.clone());
        let result = match self.script.borrow_mut().pop_front() {
            Some(result) => {
                *self.last.borrow_mut() = result.clone();
                result
            }
            None => self.last.borrow().clone(),
        };
        if let Some(stop) = self.stop_after.borrow_mut().take() {
            stop.stop();
        }
        Ok(result)
    }
}

/// Proposer that returns canned replies and records every prompt.
///
/// Calls past the end of the script fail with a transport error.
pub struct ScriptedProposer {
    replies: RefCell<VecDeque<Result<String, ProposalError>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedProposer {
    pub fn new(replies: Vec<Result<String, ProposalError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Proposer for ScriptedProposer {
    fn propose(&self, request: &ProposalRequest) -> Result<String> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProposalError::Transport("script exhausted".to_string())));
        reply.map_err(Into::into)
    }
}

/// Deploy hook with a fixed result that counts its invocations.
pub struct ScriptedDeployHook {
    success: bool,
    calls: Cell<usize>,
}

impl ScriptedDeployHook {
    pub fn new(success: bool) -> Self {
        Self {
            success,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl DeployHook for ScriptedDeployHook {
    fn deploy(&self) -> Result<DeployOutcome> {
        self.calls.set(self.calls.get() + 1);
        Ok(DeployOutcome {
            success: self.success,
            exit_code: Some(if self.success { 0 } else { 1 }),
            output: String::new(),
        })
    }
}

/// Scratch repository with the default `lib/` and `src/` roots created.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo")?;
        for root in ["lib", "src"] {
            fs::create_dir_all(dir.path().join(root))
                .with_context(|| format!("create {root}/"))?;
        }
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.root().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}
