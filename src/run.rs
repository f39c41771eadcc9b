//! The full run lifecycle: preconditions, plan, parallel task execution,
//! integration, summary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, instrument, warn};

use crate::core::naming::generate_run_id;
use crate::exit_codes;
use crate::integrate::{integrate, QualityGateFailure};
use crate::io::artifacts::{ensure_run_layout, ensure_schemas, write_summary, RunPaths};
use crate::io::config::load_config;
use crate::io::executor::Executor;
use crate::io::git::Git;
use crate::io::init::ScaffoldPaths;
use crate::planning::{generate_plan, resolve_api_keys};
use crate::scheduler::{clamp_workers, run_tasks};
use crate::task_runner::{run_task, TaskRunContext};

/// Exclusions appended to the repository's local ignore before a run.
pub const LOCAL_EXCLUDES: [&str; 2] = [".auto-codex/runs/", ".auto-codex/worktrees/"];

/// Options for `run <goal>`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub goal: String,
    pub agents: Option<usize>,
    pub base: Option<String>,
    pub no_merge: bool,
}

/// Outcome of a run, successful or not. Failures that leave artifacts behind
/// are reported here rather than as errors, so the caller can print the
/// summary path and exit with the right code.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub summary_path: PathBuf,
    pub exit_code: i32,
    pub failure: Option<String>,
    /// Plan merge notes, surfaced on success only.
    pub merge_notes: Option<String>,
}

/// Execute the full lifecycle for a goal.
///
/// Refuses to start on a dirty base. On any task failure the integration is
/// skipped and the outcome carries a non-zero exit code; precondition and
/// planning failures are returned as errors before any task state exists.
#[instrument(skip_all)]
pub fn run_goal<E: Executor + Sync>(
    start_dir: &Path,
    executor: &E,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let repo_root = Git::new(start_dir).root()?;
    let git = Git::new(&repo_root);
    let config = load_config(&ScaffoldPaths::new(&repo_root).config_path)?;

    let current = git.current_branch()?;
    let base_ref = options.base.clone().unwrap_or_else(|| current.clone());
    if !git.is_clean()? {
        bail!("working copy is dirty; commit or stash before running");
    }
    // Integration happens on the base branch, so it must be checked out.
    if base_ref != current {
        git.checkout_branch(&base_ref)
            .with_context(|| format!("checkout base branch {base_ref}"))?;
    }
    git.append_local_excludes(&LOCAL_EXCLUDES)?;

    let workers = clamp_workers(options.agents.unwrap_or(config.agents));
    let run_id = generate_run_id();
    let paths = RunPaths::new(&repo_root, &run_id);
    ensure_run_layout(&paths)?;
    ensure_schemas(&paths)?;
    info!(run_id = %run_id, workers, base = %base_ref, "run starting");

    let api_keys = resolve_api_keys(&config);
    let plan = generate_plan(
        &paths,
        executor,
        &config,
        &options.goal,
        workers,
        api_keys.first().map(String::as_str),
    )?;

    let ctx = TaskRunContext {
        paths: &paths,
        plan: &plan,
        goal: &options.goal,
        base_ref: &base_ref,
        config: &config,
        executor,
    };
    let records = match run_tasks(&plan, workers, |task, launch_index| {
        let api_key = (!api_keys.is_empty())
            .then(|| api_keys[launch_index % api_keys.len()].as_str());
        run_task(&ctx, task, api_key)
    }) {
        Ok(records) => records,
        Err(err) => {
            let cause = format!("{err:#}");
            write_summary(&paths, &plan, &BTreeMap::new(), Some(&cause))?;
            return Err(err.context("task scheduling"));
        }
    };

    let all_ok = plan
        .tasks
        .iter()
        .all(|task| records.get(&task.id).is_some_and(|r| r.succeeded()));
    if !all_ok {
        let cause = "one or more tasks failed; integration skipped";
        warn!("{cause}");
        write_summary(&paths, &plan, &records, Some(cause))?;
        return Ok(RunOutcome {
            run_id,
            summary_path: paths.summary_path.clone(),
            exit_code: exit_codes::TASK_FAILED,
            failure: Some(cause.to_string()),
            merge_notes: None,
        });
    }

    if options.no_merge {
        info!("skipping integration (--no-merge)");
        write_summary(&paths, &plan, &records, None)?;
        return Ok(RunOutcome {
            run_id,
            summary_path: paths.summary_path.clone(),
            exit_code: exit_codes::OK,
            failure: None,
            merge_notes: plan.merge_notes.clone(),
        });
    }

    match integrate(
        &git,
        executor,
        &config,
        &paths,
        &plan,
        &records,
        api_keys.first().map(String::as_str),
    ) {
        Ok(outcome) => {
            info!(merged = outcome.merged.len(), head = %outcome.head, "integration complete");
            write_summary(&paths, &plan, &records, None)?;
            Ok(RunOutcome {
                run_id,
                summary_path: paths.summary_path.clone(),
                exit_code: exit_codes::OK,
                failure: None,
                merge_notes: plan.merge_notes.clone(),
            })
        }
        Err(err) => {
            let cause = format!("{err:#}");
            write_summary(&paths, &plan, &records, Some(&cause))
                .context("write summary after integration failure")?;
            let exit_code = if err.downcast_ref::<QualityGateFailure>().is_some() {
                exit_codes::QUALITY_FAILED
            } else {
                exit_codes::INTEGRATION_FAILED
            };
            Ok(RunOutcome {
                run_id,
                summary_path: paths.summary_path.clone(),
                exit_code,
                failure: Some(cause),
                merge_notes: None,
            })
        }
    }
}
