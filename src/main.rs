//! Multi-agent orchestrator driving the codex CLI over git worktrees.
//!
//! `run` decomposes a goal into a task DAG, executes tasks concurrently in
//! isolated worktrees, and merges the resulting branches back onto the base
//! branch under conflict and quality gates.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use auto_codex::clean::clean_run;
use auto_codex::exit_codes;
use auto_codex::io::config::load_config;
use auto_codex::io::executor::CodexExecutor;
use auto_codex::io::git::Git;
use auto_codex::io::init::{init_scaffold, InitOptions, ScaffoldPaths};
use auto_codex::logging;
use auto_codex::planning::plan_goal;
use auto_codex::run::{run_goal, RunOptions};

#[derive(Parser)]
#[command(
    name = "auto-codex",
    version,
    about = "Multi-agent codex orchestrator over git worktrees"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.auto-codex/` scaffolding (config and schemas).
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Produce and validate a plan for a goal without running it.
    Plan {
        goal: String,
        /// Worker count (clamped to 1..=16).
        #[arg(short = 'j', long = "agents")]
        agents: Option<usize>,
    },
    /// Full lifecycle: plan, execute tasks in parallel, integrate branches.
    Run {
        goal: String,
        /// Worker count (clamped to 1..=16).
        #[arg(short = 'j', long = "agents")]
        agents: Option<usize>,
        /// Base branch to fork tasks from and merge back onto.
        #[arg(long)]
        base: Option<String>,
        /// Execute tasks but skip final integration.
        #[arg(long)]
        no_merge: bool,
    },
    /// Remove every worktree and branch created by a run.
    Clean { run_id: String },
    /// Print the auto-codex version.
    Version {
        /// Check for a newer release.
        #[arg(long)]
        check: bool,
    },
    /// Update auto-codex to the latest release.
    Update {
        /// Only check; do not install.
        #[arg(long)]
        check: bool,
    },
}

fn main() {
    logging::init();
    match dispatch() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn dispatch() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&cwd, force),
        Command::Plan { goal, agents } => cmd_plan(&cwd, &goal, agents),
        Command::Run {
            goal,
            agents,
            base,
            no_merge,
        } => cmd_run(&cwd, goal, agents, base, no_merge),
        Command::Clean { run_id } => cmd_clean(&cwd, &run_id),
        Command::Version { check } | Command::Update { check } => cmd_version(check),
    }
}

fn cmd_init(cwd: &PathBuf, force: bool) -> Result<i32> {
    let paths = init_scaffold(cwd, &InitOptions { force })?;
    println!("initialized {}", paths.auto_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(cwd: &PathBuf, goal: &str, agents: Option<usize>) -> Result<i32> {
    let executor = codex_executor(cwd)?;
    let outcome = plan_goal(cwd, &executor, goal, agents)?;
    println!("plan written to {}", outcome.plan_path.display());
    if let Some(notes) = &outcome.merge_notes {
        println!("merge notes: {notes}");
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    cwd: &PathBuf,
    goal: String,
    agents: Option<usize>,
    base: Option<String>,
    no_merge: bool,
) -> Result<i32> {
    let executor = codex_executor(cwd)?;
    let options = RunOptions {
        goal,
        agents,
        base,
        no_merge,
    };
    let outcome = run_goal(cwd, &executor, &options)?;
    match &outcome.failure {
        Some(cause) => eprintln!("run {} failed: {cause}", outcome.run_id),
        None => println!("run {} complete", outcome.run_id),
    }
    println!("summary: {}", outcome.summary_path.display());
    if let Some(notes) = &outcome.merge_notes {
        println!("merge notes: {notes}");
    }
    Ok(outcome.exit_code)
}

fn cmd_clean(cwd: &PathBuf, run_id: &str) -> Result<i32> {
    let outcome = clean_run(cwd, run_id)?;
    println!(
        "removed {} worktrees, deleted {} branches",
        outcome.removed_worktrees, outcome.deleted_branches
    );
    Ok(exit_codes::OK)
}

fn cmd_version(check: bool) -> Result<i32> {
    println!("auto-codex {}", env!("CARGO_PKG_VERSION"));
    if check {
        println!("update checks are disabled in this build");
    }
    Ok(exit_codes::OK)
}

/// Build the real executor from the repository's config (defaults apply when
/// no scaffold exists yet).
fn codex_executor(cwd: &PathBuf) -> Result<CodexExecutor> {
    let repo_root = Git::new(cwd).root()?;
    let config = load_config(&ScaffoldPaths::new(repo_root).config_path)?;
    Ok(CodexExecutor::new(config.codex))
}
