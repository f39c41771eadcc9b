//! Test-only helpers: temporary git repositories and scripted executors.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use serde_json::json;

use crate::core::types::{TaskOutput, TaskResult, TaskStatus};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::git::Git;

/// A temporary git repository with one initial commit.
pub struct TestRepo {
    temp: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let root = temp.path();
        run_git(root, &["init"])?;
        run_git(root, &["config", "user.email", "test@example.com"])?;
        run_git(root, &["config", "user.name", "test"])?;
        fs::write(root.join("README.md"), "hello\n").context("write README")?;
        run_git(root, &["add", "README.md"])?;
        run_git(root, &["commit", "-m", "chore: init"])?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.root())
    }

    pub fn base_branch(&self) -> Result<String> {
        self.git().current_branch()
    }

    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        Self::commit_file_in(self.root(), rel, contents, message)
    }

    /// Stage and commit everything currently in the working copy.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        run_git(self.root(), &["add", "-A"])?;
        run_git(self.root(), &["commit", "-m", message])?;
        Ok(())
    }

    /// Write and commit a file inside any working copy (root or worktree).
    pub fn commit_file_in(dir: &Path, rel: &str, contents: &str, message: &str) -> Result<()> {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        run_git(dir, &["add", "-A"])?;
        run_git(dir, &["commit", "-m", message])?;
        Ok(())
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("spawn git {args:?}"))?;
    if !status.success() {
        return Err(anyhow!("git {args:?} failed in {}", dir.display()));
    }
    Ok(())
}

type ExecHandler = dyn Fn(&ExecRequest) -> Result<i32> + Send + Sync;

/// Executor driven by a closure; never spawns a process.
pub struct ScriptedExecutor {
    handler: Box<ExecHandler>,
}

impl ScriptedExecutor {
    pub fn new(handler: impl Fn(&ExecRequest) -> Result<i32> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<i32> {
        (self.handler)(request)
    }
}

/// True when the request targets the merge resolution schema.
pub fn is_merge_request(request: &ExecRequest) -> bool {
    request
        .output_schema_path
        .file_name()
        .is_some_and(|name| name == "merge.schema.json")
}

/// True when the request targets the plan schema.
pub fn is_plan_request(request: &ExecRequest) -> bool {
    request
        .output_schema_path
        .file_name()
        .is_some_and(|name| name == "plan.schema.json")
}

/// File stem of the request's output path ("T01", "merge-T02", "plan", ...).
pub fn output_stem(request: &ExecRequest) -> String {
    request
        .output_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Write a task result document to the request's output path.
pub fn write_task_output(request: &ExecRequest, status: &str, summary: &str) -> Result<()> {
    write_output(
        &request.output_path,
        &json!({"status": status, "summary": summary}),
    )
}

/// Write a merge resolution document to the request's output path.
pub fn write_merge_output(request: &ExecRequest, summary: &str) -> Result<()> {
    write_output(
        &request.output_path,
        &json!({"status": "done", "summary": summary}),
    )
}

/// Write a plan document to the request's output path.
pub fn write_plan_output(request: &ExecRequest, plan: &serde_json::Value) -> Result<()> {
    write_output(&request.output_path, plan)
}

fn write_output(path: &PathBuf, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Deterministic TaskResult for scheduler tests.
pub fn fake_task_result(task_id: &str, exit_code: i32) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        branch: format!("acdx/test/{task_id}"),
        worktree: PathBuf::from(format!("/tmp/worktrees/{task_id}")),
        exit_code,
        commit: (exit_code == 0).then(|| format!("sha-{task_id}")),
        result_path: PathBuf::from(format!("/tmp/results/{task_id}.json")),
        log_path: PathBuf::from(format!("/tmp/logs/{task_id}.log")),
        output: (exit_code == 0).then(|| TaskOutput {
            status: TaskStatus::Done,
            summary: format!("{task_id} done"),
            notes: None,
        }),
    }
}
