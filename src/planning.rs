//! Plan generation: a read-only executor invocation that decomposes the goal
//! into a validated task DAG, plus the rendered per-task documents.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, instrument};

use crate::core::naming::generate_run_id;
use crate::core::plan::{parse_plan, Plan};
use crate::io::artifacts::{ensure_run_layout, ensure_schemas, write_text, RunPaths};
use crate::io::config::{load_config, Config, SandboxMode};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::git::Git;
use crate::io::init::ScaffoldPaths;
use crate::io::prompt::render_plan_prompt;
use crate::scheduler::clamp_workers;

/// Outcome of the standalone `plan` command.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub run_id: String,
    pub plan_path: PathBuf,
    pub merge_notes: Option<String>,
}

/// Produce `plan.json` for one run via a read-only executor invocation,
/// validate it, and render the per-task documents.
#[instrument(skip_all, fields(run_id = %paths.run_id))]
pub fn generate_plan<E: Executor>(
    paths: &RunPaths,
    executor: &E,
    config: &Config,
    goal: &str,
    workers: usize,
    api_key: Option<&str>,
) -> Result<Plan> {
    write_text(&paths.goal_path, &format!("# Goal\n\n{goal}\n"))?;

    let prompt = render_plan_prompt(goal, workers)?;
    let request = ExecRequest {
        workdir: paths.repo_root.clone(),
        prompt,
        sandbox: SandboxMode::ReadOnly,
        output_schema_path: paths.plan_schema_path(),
        output_path: paths.plan_path.clone(),
        log_path: paths.plan_log_path.clone(),
        timeout: None,
        api_key: api_key.map(str::to_string),
    };
    let exit_code = executor.exec(&request).context("plan executor")?;
    if exit_code != 0 {
        bail!(
            "planning failed: executor exited with {exit_code} (see {})",
            paths.rel(&paths.plan_log_path)
        );
    }

    let raw = fs::read_to_string(&paths.plan_path)
        .with_context(|| format!("read plan {}", paths.plan_path.display()))?;
    let plan = parse_plan(&raw)?;
    render_task_docs(paths, &plan)?;
    info!(tasks = plan.tasks.len(), "plan validated");
    Ok(plan)
}

/// The `plan <goal>` command: everything `run` does up to (not including)
/// task execution. Unlike `run`, it does not require a clean working copy;
/// the invocation is read-only.
pub fn plan_goal<E: Executor>(
    start_dir: &Path,
    executor: &E,
    goal: &str,
    agents: Option<usize>,
) -> Result<PlanOutcome> {
    let repo_root = Git::new(start_dir).root()?;
    let config = load_config(&ScaffoldPaths::new(&repo_root).config_path)?;
    let workers = clamp_workers(agents.unwrap_or(config.agents));

    let run_id = generate_run_id();
    let paths = RunPaths::new(&repo_root, &run_id);
    ensure_run_layout(&paths)?;
    ensure_schemas(&paths)?;

    let api_keys = resolve_api_keys(&config);
    let plan = generate_plan(
        &paths,
        executor,
        &config,
        goal,
        workers,
        api_keys.first().map(String::as_str),
    )?;

    Ok(PlanOutcome {
        run_id,
        plan_path: paths.plan_path.clone(),
        merge_notes: plan.merge_notes,
    })
}

/// Resolve the configured API key env vars to values, skipping unset ones.
pub fn resolve_api_keys(config: &Config) -> Vec<String> {
    config
        .codex
        .api_keys_env
        .iter()
        .filter_map(|name| match std::env::var(name) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                tracing::warn!(var = %name, "api key env var unset; skipping");
                None
            }
        })
        .collect()
}

fn render_task_docs(paths: &RunPaths, plan: &Plan) -> Result<()> {
    for task in &plan.tasks {
        let mut buf = format!("# {}: {}\n\n", task.id, task.title);
        if !task.depends_on.is_empty() {
            buf.push_str(&format!("depends on: {}\n\n", task.depends_on.join(", ")));
        }
        buf.push_str(&task.prompt);
        buf.push('\n');
        write_text(&paths.task_doc_path(&task.id), &buf)?;
    }
    Ok(())
}
