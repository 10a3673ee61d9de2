//! Self-healing build loop.
//!
//! Runs the repository's lint/test/build pipeline and, when a required step
//! fails, asks a code-generation backend for edits until it passes again or
//! the retry bound is reached. State lives under `.mender/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use mender::core::plan::TaskStatus;
use mender::core::text::tail_chars;
use mender::exit_codes;
use mender::features::{FeaturesStop, run_features};
use mender::heal::{HealOutcome, HealReport, Healer};
use mender::io::config::{DEFAULT_CONFIG_PATH, MenderConfig, load_config};
use mender::io::deploy::{CommandDeployHook, DeployHook};
use mender::io::init::{InitOptions, init_mender};
use mender::io::memory::{ErrorLog, load_brain, render_memory_context};
use mender::io::plan_store::PlanStore;
use mender::io::proposer::ConfiguredProposer;
use mender::io::steps::CommandStepRunner;
use mender::logging;
use mender::looping::{LoopConfig, LoopStop, StopSignal, deploy_after_success, run_loop};

#[derive(Parser)]
#[command(
    name = "mender",
    version,
    about = "Self-healing build loop for web repositories"
)]
struct Cli {
    /// Repository root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file. Defaults to `<root>/.mender/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.mender/` with a default config, plan, brain and error log.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the pipeline once and attempt bounded fixes on failure.
    Run {
        /// Run the deploy hook after a green pass.
        #[arg(long)]
        deploy: bool,
    },
    /// Repeat heal passes until one fails or Ctrl+C.
    Loop {
        /// Run the deploy hook after each green pass.
        #[arg(long)]
        deploy: bool,
        /// Stop after this many passes.
        #[arg(long)]
        max_passes: Option<u32>,
    },
    /// Implement open plan tasks in order, verifying each.
    Features {
        /// Stop after this many completed tasks.
        #[arg(long)]
        max_tasks: Option<usize>,
    },
    /// Inspect or edit the feature plan.
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Print the memory context the next proposal would receive.
    Brain,
}

#[derive(Subcommand)]
enum PlanAction {
    /// List tasks with their status.
    List,
    /// Mark an open task done.
    Done {
        /// Task text as shown by `mender plan list`.
        task: String,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("mender: {err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = fs::canonicalize(&cli.root)
        .with_context(|| format!("resolve root {}", cli.root.display()))?;
    let config_path = cli
        .config
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH));
    let config = || load_config(&config_path);
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run { deploy } => cmd_run(&root, &config()?, deploy),
        Command::Loop { deploy, max_passes } => cmd_loop(&root, &config()?, deploy, max_passes),
        Command::Features { max_tasks } => cmd_features(&root, &config()?, max_tasks),
        Command::Plan { action } => cmd_plan(&root, &config()?, action),
        Command::Brain => cmd_brain(&root, &config()?),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_mender(root, &InitOptions { force })?;
    println!("initialized {}", paths.mender_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, config: &MenderConfig, deploy: bool) -> Result<i32> {
    let stop = StopSignal::new();
    stop.install_ctrlc()?;
    let runner = step_runner(root, config);
    let proposer = ConfiguredProposer::from_config(root, config);
    let healer = Healer::new(root, config, &runner, &proposer, &stop);
    let hook = deploy_hook(root, config, deploy)?;

    let report = healer.run_pass()?;
    print_report(&report, config);
    if report.outcome == HealOutcome::Succeeded
        && let Some(hook) = &hook
        && let Some(outcome) = deploy_after_success(hook)
    {
        println!("deploy: {}", if outcome.success { "ok" } else { "failed" });
    }
    Ok(report.exit_code())
}

fn cmd_loop(
    root: &Path,
    config: &MenderConfig,
    deploy: bool,
    max_passes: Option<u32>,
) -> Result<i32> {
    let stop = StopSignal::new();
    stop.install_ctrlc()?;
    let runner = step_runner(root, config);
    let proposer = ConfiguredProposer::from_config(root, config);
    let healer = Healer::new(root, config, &runner, &proposer, &stop);
    let hook = deploy_hook(root, config, deploy)?;

    let outcome = run_loop(
        &healer,
        hook.as_ref().map(|hook| hook as &dyn DeployHook),
        &LoopConfig {
            delay: config.loop_delay(),
            max_passes,
        },
        |report| print_report(report, config),
    )?;
    Ok(match outcome.stop {
        LoopStop::Failed(report) => report.exit_code(),
        LoopStop::Interrupted => exit_codes::INTERRUPTED,
        LoopStop::MaxPasses => exit_codes::OK,
    })
}

fn cmd_features(root: &Path, config: &MenderConfig, max_tasks: Option<usize>) -> Result<i32> {
    let stop = StopSignal::new();
    stop.install_ctrlc()?;
    let plan = PlanStore::open(root.join(&config.paths.plan))?;
    let runner = step_runner(root, config);
    let proposer = ConfiguredProposer::from_config(root, config);
    let healer = Healer::new(root, config, &runner, &proposer, &stop);

    let outcome = run_features(&healer, &plan, max_tasks, |task, report| {
        println!("task: {task}");
        print_report(report, config);
    })?;
    println!("completed {} task(s)", outcome.completed.len());
    Ok(match outcome.stop {
        FeaturesStop::PlanComplete | FeaturesStop::MaxTasks => exit_codes::OK,
        FeaturesStop::Failed { report, .. } => report.exit_code(),
        FeaturesStop::Interrupted => exit_codes::INTERRUPTED,
    })
}

fn cmd_plan(root: &Path, config: &MenderConfig, action: PlanAction) -> Result<i32> {
    let plan = PlanStore::open(root.join(&config.paths.plan))?;
    match action {
        PlanAction::List => {
            for task in plan.load() {
                let mark = match task.status {
                    TaskStatus::Open => ' ',
                    TaskStatus::Done => 'x',
                };
                println!("[{mark}] {}", task.text);
            }
        }
        PlanAction::Done { task } => {
            if !plan.mark_done(task.trim())? {
                bail!("no open task matches {:?}", task.trim());
            }
            println!("done: {}", task.trim());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_brain(root: &Path, config: &MenderConfig) -> Result<i32> {
    let brain = load_brain(&root.join(&config.paths.brain));
    let errors = ErrorLog::new(root.join(&config.paths.errors)).load();
    let context = render_memory_context(&brain, &errors);
    if context.is_empty() {
        eprintln!("mender: no memory recorded yet");
    } else {
        print!("{context}");
    }
    Ok(exit_codes::OK)
}

fn step_runner(root: &Path, config: &MenderConfig) -> CommandStepRunner {
    CommandStepRunner::new(root, config.step_timeout(), config.output_limit_bytes)
}

/// The deploy hook when enabled in config or forced with `--deploy`.
fn deploy_hook(
    root: &Path,
    config: &MenderConfig,
    forced: bool,
) -> Result<Option<CommandDeployHook>> {
    if !config.deploy.enabled && !forced {
        return Ok(None);
    }
    if config.deploy.command.is_empty() {
        bail!("--deploy requires deploy.command in the config");
    }
    Ok(Some(CommandDeployHook {
        command: config.deploy.command.clone(),
        workdir: root.to_path_buf(),
        timeout: Duration::from_secs(config.deploy.timeout_secs),
        output_limit_bytes: config.output_limit_bytes,
    }))
}

fn print_report(report: &HealReport, config: &MenderConfig) {
    match &report.outcome {
        HealOutcome::Succeeded => {
            println!(
                "{}: pipeline green ({} proposal(s))",
                report.run_id, report.proposals
            );
        }
        HealOutcome::Interrupted => println!("{}: interrupted", report.run_id),
        HealOutcome::Failed { reason, failure } => {
            println!(
                "{}: failed ({reason:?}) after {} proposal(s)",
                report.run_id, report.proposals
            );
            if let Some(failure) = failure {
                eprintln!(
                    "--- {} failed: {} ---",
                    failure.step,
                    failure.command.join(" ")
                );
                eprintln!("{}", tail_chars(failure.output.trim_end(), config.log_tail_chars));
            }
        }
    }
}
