//! Prompt and context-document rendering for executor invocations.
//!
//! Templates are embedded so a run never depends on repository-local prompt
//! files. The `$auto-codex-task` / `$auto-codex-merge` sentinels let log
//! consumers tell invocation kinds apart.

use anyhow::{Context, Result};
use minijinja::{context, Environment};
use serde::Serialize;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const MERGE_TEMPLATE: &str = include_str!("prompts/merge.md");
const DEP_CONTEXT_TEMPLATE: &str = include_str!("prompts/dep_context.md");
const MERGE_CONTEXT_TEMPLATE: &str = include_str!("prompts/merge_context.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        env.add_template("merge", MERGE_TEMPLATE)
            .expect("merge template should be valid");
        env.add_template("dep_context", DEP_CONTEXT_TEMPLATE)
            .expect("dep_context template should be valid");
        env.add_template("merge_context", MERGE_CONTEXT_TEMPLATE)
            .expect("merge_context template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} template"))?;
        Ok(rendered)
    }
}

/// Per-task summary block used in merge context documents.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummaryBlock {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub notes: Option<String>,
}

/// Inputs for the primary task prompt.
#[derive(Debug, Clone)]
pub struct TaskPromptArgs<'a> {
    pub run_id: &'a str,
    pub base_ref: &'a str,
    pub task_id: &'a str,
    pub task_title: &'a str,
    pub goal: &'a str,
    pub overview: &'a str,
    pub prompt: &'a str,
}

pub fn render_plan_prompt(goal: &str, agents: usize) -> Result<String> {
    PromptEngine::new().render("plan", context! { goal, agents })
}

pub fn render_task_prompt(args: &TaskPromptArgs<'_>) -> Result<String> {
    PromptEngine::new().render(
        "task",
        context! {
            run_id => args.run_id,
            base_ref => args.base_ref,
            task_id => args.task_id,
            task_title => args.task_title,
            goal => args.goal,
            overview => args.overview,
            prompt => args.prompt,
        },
    )
}

/// Prompt for an executor-assisted conflict resolution (both protocols).
pub fn render_merge_prompt(
    branch: &str,
    target: &str,
    files: &[String],
    context_path: &str,
) -> Result<String> {
    PromptEngine::new().render(
        "merge",
        context! { branch, target, files, context_path },
    )
}

/// Context document for a dependency pre-merge conflict.
pub fn render_dep_merge_context(
    run_id: &str,
    task_id: &str,
    dep_branch: &str,
    files: &[String],
    deps: &[TaskSummaryBlock],
) -> Result<String> {
    PromptEngine::new().render(
        "dep_context",
        context! { run_id, task_id, dep_branch, files, deps },
    )
}

/// `MERGE_CONTEXT.md` for a final-integration conflict.
pub fn render_merge_context(
    run_id: &str,
    branch: &str,
    files: &[String],
    tasks: &[TaskSummaryBlock],
) -> Result<String> {
    PromptEngine::new().render(
        "merge_context",
        context! { run_id, branch, files, tasks },
    )
}
