//! `improver` command-line entry point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use improver::core::types::{Goal, GoalStatus, Priority};
use improver::engine::CycleEngine;
use improver::exit_codes;
use improver::io::config::{DEFAULT_CONFIG_FILE, LoggingConfig, config_base_dir, load_config};
use improver::io::goal_store::GoalStore;
use improver::io::init::{InitOptions, init_workspace};
use improver::logging;
use improver::roles::registry::RoleRegistry;

#[derive(Parser)]
#[command(
    name = "improver",
    version,
    about = "Autonomous goal-driven code improvement cycles"
)]
struct Cli {
    /// Path to the engine config file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Log at debug level regardless of config and RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Process pending goals until the queue is drained (default).
    Run {
        /// Override `engine.max_cycles` for this run.
        #[arg(long)]
        max_cycles: Option<u32>,
        /// Do not synthesize goals when the queue runs dry.
        #[arg(long)]
        no_generate: bool,
    },
    /// Write a default config, memory directory and empty goal file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// List goals and their status.
    Goals,
    /// Append a pending goal to the queue.
    AddGoal {
        id: String,
        description: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run {
        max_cycles: None,
        no_generate: false,
    });
    match command {
        Command::Run {
            max_cycles,
            no_generate,
        } => cmd_run(&cli.config, cli.verbose, max_cycles, no_generate),
        Command::Init { force } => cmd_init(&cli.config, cli.verbose, force),
        Command::Goals => cmd_goals(&cli.config, cli.verbose),
        Command::AddGoal {
            id,
            description,
            priority,
        } => cmd_add_goal(&cli.config, cli.verbose, id, description, priority.into()),
    }
}

fn cmd_run(
    config_path: &Path,
    verbose: bool,
    max_cycles: Option<u32>,
    no_generate: bool,
) -> Result<()> {
    let mut cfg = load_config(config_path)?;
    if let Some(max_cycles) = max_cycles {
        cfg.engine.max_cycles = max_cycles;
    }
    if no_generate {
        cfg.engine.autonomous_goals = false;
    }
    let base = config_base_dir(config_path);
    let paths = cfg.paths(&base);
    logging::init(&cfg.logging, paths.log_file.as_deref(), verbose)?;

    let mut engine = CycleEngine::from_config(&cfg, &base, &RoleRegistry::builtin())?;
    let report = engine.run();
    println!(
        "processed {} goal(s): {} completed, {} aborted, {} exhausted ({} attempt(s), {} generated)",
        report.goals_processed,
        report.goals_completed,
        report.goals_aborted,
        report.goals_exhausted,
        report.attempts,
        report.goals_generated,
    );
    Ok(())
}

fn cmd_init(config_path: &Path, verbose: bool, force: bool) -> Result<()> {
    logging::init(&LoggingConfig::default(), None, verbose)?;
    let paths = init_workspace(config_path, &InitOptions { force })?;
    println!("wrote {}", config_path.display());
    println!("memory: {}", paths.memory_dir.display());
    println!("goals: {}", paths.goals_path.display());
    Ok(())
}

fn cmd_goals(config_path: &Path, verbose: bool) -> Result<()> {
    let store = open_goal_store(config_path, verbose)?;
    for goal in store.goals() {
        let status = match goal.status {
            GoalStatus::Pending => "pending",
            GoalStatus::Completed => "completed",
        };
        println!(
            "{}\t{}\t{}\t{}",
            goal.id,
            status,
            goal.priority.as_str(),
            goal.description
        );
    }
    println!(
        "{} pending of {} in {}",
        store.pending_count(),
        store.goals().len(),
        store.path().display()
    );
    Ok(())
}

fn cmd_add_goal(
    config_path: &Path,
    verbose: bool,
    id: String,
    description: String,
    priority: Priority,
) -> Result<()> {
    if description.trim().is_empty() {
        return Err(anyhow!("goal description must not be empty"));
    }
    let mut store = open_goal_store(config_path, verbose)?;
    store
        .add_goal(Goal::new(id.as_str(), description).with_priority(priority))
        .with_context(|| format!("add goal {id}"))?;
    println!("added {id}");
    Ok(())
}

/// Goal store named by the config. Logs go to stderr only.
fn open_goal_store(config_path: &Path, verbose: bool) -> Result<GoalStore> {
    let cfg = load_config(config_path)?;
    logging::init(&cfg.logging, None, verbose)?;
    let paths = cfg.paths(&config_base_dir(config_path));
    Ok(GoalStore::load(paths.goals_path))
}
