//! Shared contracts between the scheduler, task runner, and integrator.
//!
//! These types define stable shapes for executor output documents and the
//! per-task bookkeeping the run summary is built from. They must remain
//! deterministic across runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Executor-declared status for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Done,
    Blocked,
    Failed,
}

/// Structured result document written by a task executor invocation
/// (`results/<taskId>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub status: TaskStatus,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Executor-declared status for a conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeResolution {
    Done,
    Failed,
}

/// Structured result document written by an executor-assisted merge
/// (`merge/merge-<taskId>.json` or `dep-merges/<taskId>/<depId>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutput {
    pub status: MergeResolution,
    pub summary: String,
}

/// Bookkeeping for one finished task runner.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub branch: String,
    pub worktree: PathBuf,
    /// Executor exit code, propagated unchanged.
    pub exit_code: i32,
    /// Commit appended to the task branch, or `None` if the working copy was
    /// clean after execution.
    pub commit: Option<String>,
    pub result_path: PathBuf,
    pub log_path: PathBuf,
    /// Parsed result document; `None` when absent or unparseable.
    #[serde(skip)]
    pub output: Option<TaskOutput>,
}

impl TaskResult {
    /// A task succeeded iff the executor exited zero AND its result document
    /// parsed AND declared `status: done`. Anything else is
    /// failure-equivalent, even on a zero exit.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
            && self
                .output
                .as_ref()
                .is_some_and(|out| out.status == TaskStatus::Done)
    }
}

/// Outcome recorded by the scheduler for one task.
#[derive(Debug)]
pub enum ExecutionRecord {
    /// The task runner finished and produced a result (possibly a failure).
    Finished(TaskResult),
    /// The task runner itself errored before producing a result.
    Errored(String),
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        match self {
            ExecutionRecord::Finished(result) => result.succeeded(),
            ExecutionRecord::Errored(_) => false,
        }
    }

    pub fn task_result(&self) -> Option<&TaskResult> {
        match self {
            ExecutionRecord::Finished(result) => Some(result),
            ExecutionRecord::Errored(_) => None,
        }
    }
}
