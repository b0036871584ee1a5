//! Branch-locked task dispatcher.
//!
//! Reads the shared tracker, selects the next pending task of the current
//! phase and claims it with a `<agent>/task-<id>` branch. Designed to be run
//! periodically by a scheduler: idle, waiting and locked runs exit 0.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use dispatcher::core::invariants::unknown_dependencies;
use dispatcher::core::lock::{lock_name, validate_lock_name};
use dispatcher::dispatch::{DispatchEvent, DispatchOutcome, Dispatcher, LockReason};
use dispatcher::exit_codes;
use dispatcher::io::config::{
    CONFIG_FILE_NAME, ConfigOverrides, DispatcherConfig, Strategy, resolve_config,
};
use dispatcher::io::process::{CommandFailed, SystemRunner};
use dispatcher::io::tracker_store::{MalformedTracker, TrackerNotFound};
use dispatcher::logging;
use dispatcher::resolve::resolve_agent;
use dispatcher::select::{AttemptsExhausted, SelectOutcome, load_configured_tracker, select_next};
use dispatcher::status::summarize;

#[derive(Parser)]
#[command(
    name = "dispatcher",
    version,
    about = "Claim the next tracker task with a branch lock"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Defaults to `dispatch`.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Repository root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/dispatcher.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Resolution strategy: `fixed` or `auto`.
    #[arg(long, global = true)]
    strategy: Option<Strategy>,

    /// Agent name used to namespace lock branches.
    #[arg(long, global = true)]
    agent: Option<String>,

    /// Base branch claim branches start from.
    #[arg(long, global = true)]
    base_branch: Option<String>,

    /// Tracker path relative to the root.
    #[arg(long, global = true)]
    tracker: Option<PathBuf>,

    /// Remote holding the lock branches.
    #[arg(long, global = true)]
    remote: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Select, lock and check out the next task, then print its package.
    Dispatch {
        /// Push the claim branch so other dispatchers see the lock.
        #[arg(long)]
        push: bool,
        /// Print only the task package JSON on stdout.
        #[arg(long)]
        package_only: bool,
    },
    /// Print the id of the next task without touching git.
    Select,
    /// Print the lock branch name for a task.
    LockName { task_id: String },
    /// Check tracker against schema and invariants (unique ids, known dependencies).
    Validate,
    /// Summarize phases and task states.
    Status,
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(parse_error_code(&err));
        }
    };
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

/// `--help` and `--version` succeed; every usage error is a plain failure.
fn parse_error_code(err: &clap::Error) -> i32 {
    if err.exit_code() == 0 {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    }
}

fn run(cli: Cli) -> Result<i32> {
    let command = cli.command.unwrap_or(Command::Dispatch {
        push: false,
        package_only: false,
    });
    let push = matches!(command, Command::Dispatch { push: true, .. });
    let cfg = load_cli_config(&cli.global, push)?;
    let root = cli.global.root;
    match command {
        Command::Dispatch { package_only, .. } => cmd_dispatch(root, cfg, package_only),
        Command::Select => cmd_select(root, &cfg),
        Command::LockName { task_id } => cmd_lock_name(root, &cfg, &task_id),
        Command::Validate => cmd_validate(root, &cfg),
        Command::Status => cmd_status(root, &cfg),
    }
}

fn load_cli_config(global: &GlobalArgs, push: bool) -> Result<DispatcherConfig> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(|| global.root.join(CONFIG_FILE_NAME));
    let overrides = ConfigOverrides {
        strategy: global.strategy,
        agent_name: global.agent.clone(),
        base_branch: global.base_branch.clone(),
        tracker_path: global.tracker.clone(),
        remote: global.remote.clone(),
        push_claim: push,
    };
    resolve_config(&path, &overrides)
}

fn cmd_dispatch(root: PathBuf, cfg: DispatcherConfig, package_only: bool) -> Result<i32> {
    let runner = SystemRunner {
        timeout: cfg.command_timeout(),
        output_limit_bytes: cfg.output_limit_bytes,
    };
    if !package_only {
        println!("Task dispatcher (strategy: {})", cfg.strategy);
    }
    let dispatcher = Dispatcher::new(root, cfg, runner);
    let outcome = dispatcher.run(|event| {
        if !package_only {
            print_event(event);
        }
    })?;

    let message = match &outcome {
        DispatchOutcome::Idle => "All phases completed. Dispatcher is idle.".to_string(),
        DispatchOutcome::Waiting { phase } => format!(
            "All tasks in '{phase}' are completed or in progress. Waiting for the phase to advance."
        ),
        DispatchOutcome::Locked {
            branch,
            reason: LockReason::RemoteBranchExists,
        } => format!("Branch '{branch}' already exists on remote. Task is locked."),
        DispatchOutcome::Locked {
            branch,
            reason: LockReason::PushRejected,
        } => format!("Push of '{branch}' was rejected by the remote. Task is locked."),
        DispatchOutcome::Dispatched(package) => {
            let json = serde_json::to_string_pretty(package)?;
            if package_only {
                println!("{json}");
            } else {
                println!("Task package:");
                println!("{json}");
                println!("Next: hand the package to the worker.");
            }
            return Ok(exit_codes::OK);
        }
    };
    if package_only {
        eprintln!("{message}");
    } else {
        println!("{message}");
    }
    Ok(exit_codes::OK)
}

fn print_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::TrackerLoaded { path } => println!("Tracker: {}", path.display()),
        DispatchEvent::CheckingLock { branch } => {
            println!("Checking remote lock for branch: {branch}");
        }
        DispatchEvent::Dispatching {
            task,
            agent,
            base_branch,
        } => {
            println!(
                "Dispatching task: {} ({}) for {agent} from {base_branch}",
                task.id, task.title
            );
        }
        DispatchEvent::BranchCreated { branch } => println!("Feature branch '{branch}' created."),
        DispatchEvent::BranchPublished { branch, remote } => {
            println!("Branch '{branch}' pushed to {remote}.");
        }
        DispatchEvent::ClaimRolledBack { branch } => {
            println!("Local branch '{branch}' removed.");
        }
    }
}

fn cmd_select(root: PathBuf, cfg: &DispatcherConfig) -> Result<i32> {
    let loaded = load_configured_tracker(&root, cfg)?;
    match select_next(&loaded.tracker, cfg.max_attempts) {
        SelectOutcome::Ready(task) => println!("{}", task.id),
        SelectOutcome::AllPhasesComplete => eprintln!("All phases completed. Dispatcher is idle."),
        SelectOutcome::PhaseExhausted { phase } => {
            eprintln!("All tasks in '{phase}' are completed or in progress.");
        }
        SelectOutcome::AttemptsExhausted(task) => {
            return Err(AttemptsExhausted::new(&task, cfg.max_attempts).into());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_lock_name(root: PathBuf, cfg: &DispatcherConfig, task_id: &str) -> Result<i32> {
    let agent = match cfg.strategy {
        Strategy::Fixed => resolve_agent(cfg, None),
        Strategy::Auto => match load_configured_tracker(&root, cfg) {
            Ok(loaded) => resolve_agent(cfg, Some(&loaded.tracker)),
            Err(err) if err.downcast_ref::<TrackerNotFound>().is_some() => {
                resolve_agent(cfg, None)
            }
            Err(err) => return Err(err),
        },
    };
    let name = lock_name(&agent, task_id);
    validate_lock_name(&name)?;
    println!("{name}");
    Ok(exit_codes::OK)
}

fn cmd_validate(root: PathBuf, cfg: &DispatcherConfig) -> Result<i32> {
    let loaded = load_configured_tracker(&root, cfg)?;
    let errors = unknown_dependencies(&loaded.tracker);
    if !errors.is_empty() {
        bail!(
            "tracker {} has dangling dependencies:\n- {}",
            loaded.path.display(),
            errors.join("\n- ")
        );
    }
    println!(
        "tracker OK: {} ({} phases, {} tasks)",
        loaded.path.display(),
        loaded.tracker.phases.len(),
        loaded.tracker.tasks().count()
    );
    Ok(exit_codes::OK)
}

fn cmd_status(root: PathBuf, cfg: &DispatcherConfig) -> Result<i32> {
    let loaded = load_configured_tracker(&root, cfg)?;
    print!("{}", summarize(&loaded.tracker));
    Ok(exit_codes::OK)
}

fn report_error(err: &anyhow::Error) {
    eprintln!("{:#}", err);
    if err.downcast_ref::<TrackerNotFound>().is_some() {
        eprintln!("hint: the tracker may not be scaffolded yet");
    } else if err.downcast_ref::<MalformedTracker>().is_some() {
        eprintln!("hint: fix the tracker before dispatching again");
    } else if err.downcast_ref::<AttemptsExhausted>().is_some() {
        eprintln!("hint: reset attempts or fix the task manually");
    } else if err.downcast_ref::<CommandFailed>().is_some() {
        eprintln!("hint: the working copy may be left on an intermediate branch");
    }
}
