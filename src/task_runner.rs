//! Per-task lifecycle: isolated worktree, dependency pre-merge, primary
//! executor invocation, commit policy.
//!
//! A task runner is strictly sequential and never retries; the executor exit
//! code is propagated unchanged as the per-task success signal.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::plan::{Plan, Task};
use crate::core::naming::task_branch;
use crate::core::types::TaskResult;
use crate::io::artifacts::RunPaths;
use crate::io::config::Config;
use crate::io::executor::{load_task_output, ExecRequest, Executor};
use crate::io::git::{Git, MergeMode};
use crate::io::prompt::{
    render_dep_merge_context, render_task_prompt, TaskPromptArgs, TaskSummaryBlock,
};
use crate::merge_assist::{merge_with_assist, MergeArtifacts};

/// Shared, read-only context for every task runner of one run.
pub struct TaskRunContext<'a, E: Executor> {
    pub paths: &'a RunPaths,
    pub plan: &'a Plan,
    pub goal: &'a str,
    pub base_ref: &'a str,
    pub config: &'a Config,
    pub executor: &'a E,
}

/// Execute one task in its own worktree and return its result.
///
/// Infrastructure failures (worktree creation, a dependency merge that cannot
/// be completed) are `Err`; an executor failure is a normal `TaskResult` with
/// a non-zero exit code.
#[instrument(skip_all, fields(task = %task.id))]
pub fn run_task<E: Executor>(
    ctx: &TaskRunContext<'_, E>,
    task: &Task,
    api_key: Option<&str>,
) -> Result<TaskResult> {
    let branch = task_branch(&ctx.paths.run_id, &task.id);
    let worktree = ctx.paths.worktree_path(&task.id);

    let repo_git = Git::new(&ctx.paths.repo_root);
    repo_git
        .worktree_add(ctx.base_ref, &branch, &worktree)
        .with_context(|| format!("create worktree for {}", task.id))?;
    info!(branch = %branch, worktree = %worktree.display(), "worktree created");

    let git = Git::new(&worktree);
    premerge_dependencies(ctx, task, &git, &branch, api_key)?;

    let prompt = render_task_prompt(&TaskPromptArgs {
        run_id: &ctx.paths.run_id,
        base_ref: ctx.base_ref,
        task_id: &task.id,
        task_title: &task.title,
        goal: ctx.goal,
        overview: &ctx.plan.overview,
        prompt: &task.prompt,
    })?;
    let result_path = ctx.paths.result_path(&task.id);
    let log_path = ctx.paths.log_path(&task.id);
    let request = ExecRequest {
        workdir: worktree.clone(),
        prompt,
        sandbox: ctx.config.codex.sandbox,
        output_schema_path: ctx.paths.task_schema_path(),
        output_path: result_path.clone(),
        log_path: log_path.clone(),
        timeout: None,
        api_key: api_key.map(str::to_string),
    };
    let exit_code = ctx
        .executor
        .exec(&request)
        .with_context(|| format!("execute task {}", task.id))?;

    let commit = if git.is_clean()? {
        debug!("working copy clean after execution; no commit");
        None
    } else {
        git.add_all()?;
        git.commit_no_verify(&format!("{}: {}", task.id, task.title))?;
        Some(git.head_sha()?)
    };

    let output = load_task_output(&result_path).ok();
    Ok(TaskResult {
        task_id: task.id.clone(),
        branch,
        worktree,
        exit_code,
        commit,
        result_path,
        log_path,
        output,
    })
}

/// Merge each dependency branch into the task worktree, in the order listed
/// (duplicates count once). Conflicts are delegated to the executor.
fn premerge_dependencies<E: Executor>(
    ctx: &TaskRunContext<'_, E>,
    task: &Task,
    git: &Git,
    branch: &str,
    api_key: Option<&str>,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    let deps: Vec<&str> = task
        .depends_on
        .iter()
        .map(String::as_str)
        .filter(|dep| seen.insert(*dep))
        .collect();
    if deps.is_empty() {
        return Ok(());
    }

    let summaries = dependency_summaries(ctx, &deps);
    for dep in &deps {
        let dep_branch = task_branch(&ctx.paths.run_id, dep);
        let artifacts = MergeArtifacts {
            context_path: ctx.paths.dep_merge_context_path(&task.id, dep),
            result_path: ctx.paths.dep_merge_result_path(&task.id, dep),
            log_path: ctx.paths.dep_merge_log_path(&task.id, dep),
            schema_path: ctx.paths.merge_schema_path(),
        };
        merge_with_assist(
            git,
            ctx.executor,
            ctx.config.codex.sandbox,
            api_key,
            branch,
            &dep_branch,
            MergeMode::NoFfNoEdit,
            &format!("Merge {dep_branch} (deps for {})", task.id),
            &artifacts,
            |files| {
                render_dep_merge_context(&ctx.paths.run_id, &task.id, &dep_branch, files, &summaries)
            },
        )
        .with_context(|| format!("pre-merge {dep} into {}", task.id))?;
    }
    Ok(())
}

/// Summaries of already-finished dependencies, from their result documents.
fn dependency_summaries<E: Executor>(
    ctx: &TaskRunContext<'_, E>,
    deps: &[&str],
) -> Vec<TaskSummaryBlock> {
    deps.iter()
        .filter_map(|dep| {
            let output = load_task_output(&ctx.paths.result_path(dep)).ok()?;
            let title = ctx
                .plan
                .task(dep)
                .map(|t| t.title.clone())
                .unwrap_or_default();
            Some(TaskSummaryBlock {
                id: dep.to_string(),
                title,
                summary: output.summary,
                notes: output.notes,
            })
        })
        .collect()
}
