//! Pass-level tests for heal and feature lifecycles.
//!
//! These drive `Healer` with scripted pipelines and proposers against a scratch
//! repository and check what ends up on disk: edited files, backups, the error
//! log, the session log and the plan.

use std::fs;

use serde_json::Value;

use mender::core::retry::TerminalReason;
use mender::core::types::StepResult;
use mender::features::{FeaturesStop, run_features};
use mender::heal::{HealOutcome, Healer};
use mender::io::config::MenderConfig;
use mender::io::memory::{ErrorLog, load_brain};
use mender::io::plan_store::PlanStore;
use mender::looping::StopSignal;
use mender::test_support::{ScriptedProposer, ScriptedStepRunner, TestRepo};

fn config() -> MenderConfig {
    let mut config = MenderConfig::default();
    config.context.git_history = 0;
    config
}

fn edit(file: &str, before: &str, after: &str) -> String {
    serde_json::json!({ "edits": [{ "file": file, "before": before, "after": after }] })
        .to_string()
}

fn session_lines(repo: &TestRepo, config: &MenderConfig) -> Vec<Value> {
    let path = repo.root().join(&config.paths.sessions);
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("session json"))
        .collect()
}

/// A failing step is fixed by one replace edit; the original content is
/// backed up under the run's backup directory.
#[test]
fn failing_build_is_fixed_and_backed_up() {
    let repo = TestRepo::new().expect("repo");
    repo.write("lib/a.ts", "const a = 1;\n").expect("write");
    let config = config();
    let runner = ScriptedStepRunner::new(vec![
        StepResult::failed(Some(2), "lib/a.ts: expected 2"),
        StepResult::passed("ok"),
    ]);
    let proposer = ScriptedProposer::new(vec![Ok(edit(
        "lib/a.ts",
        "const a = 1;",
        "const a = 2;",
    ))]);
    let stop = StopSignal::new();

    let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
        .run_pass()
        .expect("pass");

    assert_eq!(report.outcome, HealOutcome::Succeeded);
    assert_eq!(report.proposals, 1);
    assert_eq!(repo.read("lib/a.ts").expect("read"), "const a = 2;\n");
    let backup = repo
        .root()
        .join(&config.paths.backups)
        .join(&report.run_id)
        .join("lib/a.ts");
    assert_eq!(fs::read_to_string(backup).expect("backup"), "const a = 1;\n");
    assert_eq!(runner.calls(), vec!["Lint", "Lint", "Test", "Build"]);

    let prompt = &proposer.prompts()[0];
    assert!(prompt.contains("Step: Lint"));
    assert!(prompt.contains("lib/a.ts: expected 2"));

    let errors = ErrorLog::new(repo.root().join(&config.paths.errors)).load();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].step, "Lint");

    let sessions = session_lines(&repo, &config);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["run_id"], report.run_id.as_str());
    assert_eq!(sessions[0]["outcomes"][0]["status"], "replaced");
}

/// An edit aimed at a deny-listed root never touches disk, and a batch with
/// nothing applied ends the pass after a single proposal.
#[test]
fn denied_edit_is_skipped_and_pass_fails() {
    let repo = TestRepo::new().expect("repo");
    repo.write("node_modules/x.js", "module.exports = 1;\n")
        .expect("write");
    let config = config();
    let runner = ScriptedStepRunner::always(StepResult::failed(Some(3), "boom"));
    let proposer = ScriptedProposer::new(vec![Ok(edit(
        "node_modules/x.js",
        "module.exports = 1;",
        "module.exports = 2;",
    ))]);
    let stop = StopSignal::new();

    let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
        .run_pass()
        .expect("pass");

    assert!(matches!(
        report.outcome,
        HealOutcome::Failed {
            reason: TerminalReason::NoPatch,
            ..
        }
    ));
    assert_eq!(report.exit_code(), 3);
    assert_eq!(proposer.calls(), 1);
    assert_eq!(
        repo.read("node_modules/x.js").expect("read"),
        "module.exports = 1;\n"
    );
    let sessions = session_lines(&repo, &config);
    assert_eq!(sessions[0]["outcomes"][0]["status"], "skipped");
    assert_eq!(sessions[0]["outcomes"][0]["reason"], "denied");
}

/// A blank target path skips only that edit; the rest of the batch applies.
#[test]
fn blank_path_is_skipped_and_batch_still_applies() {
    let repo = TestRepo::new().expect("repo");
    repo.write("lib/a.ts", "const a = 1;\n").expect("write");
    let config = config();
    let runner = ScriptedStepRunner::new(vec![
        StepResult::failed(Some(2), "lib/a.ts: expected 2"),
        StepResult::passed("ok"),
    ]);
    let reply = serde_json::json!({ "edits": [
        { "file": "lib/a.ts", "before": "const a = 1;", "after": "const a = 2;" },
        { "file": "", "before": "", "after": "stray" },
    ]})
    .to_string();
    let proposer = ScriptedProposer::new(vec![Ok(reply)]);
    let stop = StopSignal::new();

    let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
        .run_pass()
        .expect("pass");

    assert_eq!(report.outcome, HealOutcome::Succeeded);
    assert_eq!(repo.read("lib/a.ts").expect("read"), "const a = 2;\n");
    let sessions = session_lines(&repo, &config);
    assert_eq!(sessions[0]["outcomes"][0]["status"], "replaced");
    assert_eq!(sessions[0]["outcomes"][1]["status"], "skipped");
    assert_eq!(sessions[0]["outcomes"][1]["reason"], "denied");
}

/// An empty edit batch is a no-fix: terminal without a second proposal or
/// another pipeline run.
#[test]
fn empty_batch_fails_without_second_call() {
    let repo = TestRepo::new().expect("repo");
    let config = config();
    let runner = ScriptedStepRunner::always(StepResult::failed(Some(1), "still broken"));
    let proposer = ScriptedProposer::new(vec![
        Ok("{\"edits\": []}".to_string()),
        Ok(edit("lib/a.ts", "", "unused")),
    ]);
    let stop = StopSignal::new();

    let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
        .run_pass()
        .expect("pass");

    assert!(matches!(
        report.outcome,
        HealOutcome::Failed {
            reason: TerminalReason::NoPatch,
            ..
        }
    ));
    assert_eq!(proposer.calls(), 1);
    assert_eq!(runner.calls(), vec!["Lint"]);
    let sessions = session_lines(&repo, &config);
    assert_eq!(sessions.len(), 1);
    assert!(
        sessions[0]["proposal_error"]
            .as_str()
            .is_some_and(|err| !err.is_empty())
    );
}

/// Re-verification failures are retried `retry_limit` times, then the pass
/// gives up. The second prompt carries the previous attempt's summary.
#[test]
fn retries_are_bounded_by_retry_limit() {
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.ts", "export {};\n").expect("write");
    let config = config();
    let runner = ScriptedStepRunner::always(StepResult::failed(Some(1), "type error"));
    let proposer = ScriptedProposer::new(vec![
        Ok(edit("src/app.ts", "", "// first\n")),
        Ok(edit("src/app.ts", "", "// second\n")),
        Ok(edit("src/app.ts", "", "// third\n")),
    ]);
    let stop = StopSignal::new();

    let report = Healer::new(repo.root(), &config, &runner, &proposer, &stop)
        .run_pass()
        .expect("pass");

    assert!(matches!(
        report.outcome,
        HealOutcome::Failed {
            reason: TerminalReason::RetriesExhausted,
            ..
        }
    ));
    assert_eq!(config.retry_limit, 1);
    assert_eq!(proposer.calls(), 2);
    assert_eq!(runner.calls(), vec!["Lint", "Lint", "Lint"]);
    assert_eq!(
        repo.read("src/app.ts").expect("read"),
        "export {};\n// first\n// second\n"
    );

    let prompts = proposer.prompts();
    assert!(!prompts[0].contains("### Previous Attempt"));
    assert!(prompts[1].contains("### Previous Attempt"));
    assert!(prompts[1].contains("- src/app.ts: appended"));

    // One backup per file per run, holding the pre-pass content.
    let backup = repo
        .root()
        .join(&config.paths.backups)
        .join(&report.run_id)
        .join("src/app.ts");
    assert_eq!(fs::read_to_string(backup).expect("backup"), "export {};\n");
}

/// Brain guidance reaches the prompt; an absent brain loads as empty.
#[test]
fn brain_laws_are_rendered_into_prompt() {
    let repo = TestRepo::new().expect("repo");
    let config = config();
    let brain_path = repo.root().join(&config.paths.brain);
    assert!(load_brain(&brain_path).is_empty());

    repo.write(
        ".mender/brain.json",
        r#"{"repo_laws": ["Use named exports only"], "file_laws": {"lib/db.ts": ["Never import from app/"]}}"#,
    )
    .expect("write brain");
    let runner = ScriptedStepRunner::always(StepResult::failed(Some(1), "broken"));
    let proposer = ScriptedProposer::new(vec![Ok("{\"edits\": []}".to_string())]);
    let stop = StopSignal::new();

    Healer::new(repo.root(), &config, &runner, &proposer, &stop)
        .run_pass()
        .expect("pass");

    let prompt = &proposer.prompts()[0];
    assert!(prompt.contains("Use named exports only"));
    assert!(prompt.contains("lib/db.ts"));
    assert!(prompt.contains("Never import from app/"));
}

/// Feature mode works tasks top to bottom and marks each done once green.
#[test]
fn features_complete_plan_in_order() {
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.ts", "export {};\n").expect("write");
    repo.write(
        ".mender/plan.md",
        "# Plan\n\n- [ ] Add X\n- [x] Old task\n- Add Y\n",
    )
    .expect("write plan");
    let config = config();
    let plan = PlanStore::open(repo.root().join(&config.paths.plan)).expect("plan");
    let runner = ScriptedStepRunner::always(StepResult::passed("ok"));
    let proposer = ScriptedProposer::new(vec![
        Ok(edit("src/app.ts", "", "export const x = 1;\n")),
        Ok(edit("src/app.ts", "", "export const y = 1;\n")),
    ]);
    let stop = StopSignal::new();
    let healer = Healer::new(repo.root(), &config, &runner, &proposer, &stop);

    let mut seen = Vec::new();
    let outcome = run_features(&healer, &plan, None, |task, _| seen.push(task.to_string()))
        .expect("features");

    assert!(matches!(outcome.stop, FeaturesStop::PlanComplete));
    assert_eq!(outcome.completed, vec!["Add X", "Add Y"]);
    assert_eq!(seen, vec!["Add X", "Add Y"]);
    assert_eq!(
        repo.read(".mender/plan.md").expect("plan"),
        "# Plan\n\n- [x] Add X\n- [x] Old task\n- [x] Add Y\n"
    );
    assert_eq!(
        repo.read("src/app.ts").expect("read"),
        "export {};\nexport const x = 1;\nexport const y = 1;\n"
    );
    let prompts = proposer.prompts();
    assert!(prompts[0].contains("Add X"));
    assert!(prompts[1].contains("Add Y"));
    let sessions = session_lines(&repo, &config);
    assert_eq!(sessions[0]["objective"], "feature");
    assert_eq!(sessions[0]["step"], "Add X");
}

/// The first task that cannot be implemented stops feature mode and stays
/// open in the plan.
#[test]
fn features_stop_at_first_failed_task() {
    let repo = TestRepo::new().expect("repo");
    repo.write(".mender/plan.md", "- [ ] Add X\n- [ ] Add Y\n")
        .expect("write plan");
    let config = config();
    let plan = PlanStore::open(repo.root().join(&config.paths.plan)).expect("plan");
    let runner = ScriptedStepRunner::always(StepResult::passed("ok"));
    let proposer = ScriptedProposer::new(vec![Ok("{\"edits\": []}".to_string())]);
    let stop = StopSignal::new();
    let healer = Healer::new(repo.root(), &config, &runner, &proposer, &stop);

    let outcome = run_features(&healer, &plan, None, |_, _| {}).expect("features");

    match outcome.stop {
        FeaturesStop::Failed { task, report } => {
            assert_eq!(task, "Add X");
            assert_eq!(report.exit_code(), mender::exit_codes::FAILURE);
        }
        other => panic!("unexpected stop: {other:?}"),
    }
    assert!(outcome.completed.is_empty());
    assert!(runner.calls().is_empty());
    assert_eq!(
        repo.read(".mender/plan.md").expect("plan"),
        "- [ ] Add X\n- [ ] Add Y\n"
    );
}

/// `max_tasks` caps how many tasks one invocation completes.
#[test]
fn features_honor_max_tasks() {
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.ts", "export {};\n").expect("write");
    repo.write(".mender/plan.md", "- [ ] Add X\n- [ ] Add Y\n")
        .expect("write plan");
    let config = config();
    let plan = PlanStore::open(repo.root().join(&config.paths.plan)).expect("plan");
    let runner = ScriptedStepRunner::always(StepResult::passed("ok"));
    let proposer = ScriptedProposer::new(vec![Ok(edit("src/app.ts", "", "// x\n"))]);
    let stop = StopSignal::new();
    let healer = Healer::new(repo.root(), &config, &runner, &proposer, &stop);

    let outcome = run_features(&healer, &plan, Some(1), |_, _| {}).expect("features");

    assert!(matches!(outcome.stop, FeaturesStop::MaxTasks));
    assert_eq!(outcome.completed, vec!["Add X"]);
    assert_eq!(plan.open_tasks().len(), 1);
}
