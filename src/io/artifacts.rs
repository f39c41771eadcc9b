//! Persistent per-run artifacts under `.auto-codex/`.
//!
//! Artifact paths are stable across runs; the `<RunId>` segment isolates
//! runs. Files are write-once per task (logs are append-only) and are never
//! pruned by the run lifecycle; `clean` is the only reaper, and it leaves
//! `runs/` alone.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::plan::Plan;
use crate::core::schema::{MERGE_SCHEMA, PLAN_SCHEMA, TASK_SCHEMA};
use crate::core::types::ExecutionRecord;

/// All canonical paths for one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub repo_root: PathBuf,
    pub run_id: String,
    pub auto_dir: PathBuf,
    pub run_dir: PathBuf,
    pub plan_path: PathBuf,
    pub plan_log_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub goal_path: PathBuf,
    pub results_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub dep_merges_dir: PathBuf,
    pub merge_dir: PathBuf,
    pub merge_context_path: PathBuf,
    pub summary_path: PathBuf,
    pub worktrees_dir: PathBuf,
    pub schemas_dir: PathBuf,
}

impl RunPaths {
    pub fn new(repo_root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        let repo_root = repo_root.into();
        let run_id = run_id.into();
        let auto_dir = repo_root.join(".auto-codex");
        let run_dir = auto_dir.join("runs").join(&run_id);
        let tasks_dir = run_dir.join("tasks");
        let merge_dir = run_dir.join("merge");
        Self {
            repo_root: repo_root.clone(),
            run_id: run_id.clone(),
            auto_dir: auto_dir.clone(),
            run_dir: run_dir.clone(),
            plan_path: run_dir.join("plan.json"),
            plan_log_path: run_dir.join("plan.log"),
            tasks_dir: tasks_dir.clone(),
            goal_path: tasks_dir.join("GOAL.md"),
            results_dir: run_dir.join("results"),
            logs_dir: run_dir.join("logs"),
            dep_merges_dir: run_dir.join("dep-merges"),
            merge_dir: merge_dir.clone(),
            merge_context_path: merge_dir.join("MERGE_CONTEXT.md"),
            summary_path: run_dir.join("SUMMARY.md"),
            worktrees_dir: auto_dir.join("worktrees").join(&run_id),
            schemas_dir: auto_dir.join("schemas"),
        }
    }

    pub fn task_doc_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{task_id}.md"))
    }

    pub fn result_path(&self, task_id: &str) -> PathBuf {
        self.results_dir.join(format!("{task_id}.json"))
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{task_id}.log"))
    }

    pub fn dep_merge_dir(&self, task_id: &str) -> PathBuf {
        self.dep_merges_dir.join(task_id)
    }

    pub fn dep_merge_context_path(&self, task_id: &str, dep_id: &str) -> PathBuf {
        self.dep_merge_dir(task_id).join(format!("{dep_id}.md"))
    }

    pub fn dep_merge_result_path(&self, task_id: &str, dep_id: &str) -> PathBuf {
        self.dep_merge_dir(task_id).join(format!("{dep_id}.json"))
    }

    pub fn dep_merge_log_path(&self, task_id: &str, dep_id: &str) -> PathBuf {
        self.dep_merge_dir(task_id).join(format!("{dep_id}.log"))
    }

    pub fn merge_result_path(&self, task_id: &str) -> PathBuf {
        self.merge_dir.join(format!("merge-{task_id}.json"))
    }

    pub fn merge_log_path(&self, task_id: &str) -> PathBuf {
        self.merge_dir.join(format!("merge-{task_id}.log"))
    }

    pub fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir.join(task_id)
    }

    pub fn plan_schema_path(&self) -> PathBuf {
        self.schemas_dir.join("plan.schema.json")
    }

    pub fn task_schema_path(&self) -> PathBuf {
        self.schemas_dir.join("task.schema.json")
    }

    pub fn merge_schema_path(&self) -> PathBuf {
        self.schemas_dir.join("merge.schema.json")
    }

    /// Render a path relative to the repository root for human-facing output.
    pub fn rel(&self, path: &Path) -> String {
        path.strip_prefix(&self.repo_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Create the run's directory layout.
pub fn ensure_run_layout(paths: &RunPaths) -> Result<()> {
    for dir in [
        &paths.run_dir,
        &paths.tasks_dir,
        &paths.results_dir,
        &paths.logs_dir,
        &paths.dep_merges_dir,
        &paths.merge_dir,
        &paths.worktrees_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Write the embedded schemas under `.auto-codex/schemas/` if missing.
pub fn ensure_schemas(paths: &RunPaths) -> Result<()> {
    fs::create_dir_all(&paths.schemas_dir)
        .with_context(|| format!("create directory {}", paths.schemas_dir.display()))?;
    for (path, contents) in [
        (paths.plan_schema_path(), PLAN_SCHEMA),
        (paths.task_schema_path(), TASK_SCHEMA),
        (paths.merge_schema_path(), MERGE_SCHEMA),
    ] {
        if !path.exists() {
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
    }
    Ok(())
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    write_text(path, &payload)
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Per-task line status for the run summary.
fn record_status(record: &ExecutionRecord) -> String {
    match record {
        ExecutionRecord::Finished(result) if result.succeeded() => "OK".to_string(),
        ExecutionRecord::Finished(result) if result.exit_code != 0 => {
            format!("FAIL({})", result.exit_code)
        }
        ExecutionRecord::Finished(_) => "FAIL(invalid-result)".to_string(),
        ExecutionRecord::Errored(_) => "FAIL(error)".to_string(),
    }
}

/// Write `SUMMARY.md` for a run.
///
/// Lists every task with status, branch, commit, and artifact paths; records
/// the fatal cause when the run did not fully succeed.
pub fn write_summary(
    paths: &RunPaths,
    plan: &Plan,
    records: &BTreeMap<String, ExecutionRecord>,
    fatal: Option<&str>,
) -> Result<()> {
    let mut buf = String::new();
    buf.push_str(&format!("# Run {}\n\n", paths.run_id));
    buf.push_str(&format!("Plan: {}\n\n", plan.title));
    buf.push_str("## Tasks\n\n");

    for id in &plan.order {
        let title = plan.task(id).map(|t| t.title.as_str()).unwrap_or("");
        match records.get(id) {
            Some(record) => {
                let status = record_status(record);
                match record.task_result() {
                    Some(result) => {
                        let commit = result.commit.as_deref().unwrap_or("none");
                        buf.push_str(&format!(
                            "- {id} ({title}) — {status} — branch `{}` — commit `{commit}` — result `{}` — log `{}`\n",
                            result.branch,
                            paths.rel(&result.result_path),
                            paths.rel(&result.log_path),
                        ));
                    }
                    None => {
                        let detail = match record {
                            ExecutionRecord::Errored(message) => message.as_str(),
                            ExecutionRecord::Finished(_) => "",
                        };
                        buf.push_str(&format!("- {id} ({title}) — {status} — {detail}\n"));
                    }
                }
            }
            None => {
                buf.push_str(&format!("- {id} ({title}) — NOT RUN\n"));
            }
        }
    }

    if let Some(cause) = fatal {
        buf.push_str("\n## Failure\n\n");
        buf.push_str(cause);
        buf.push('\n');
    }

    write_text(&paths.summary_path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::{validate_plan, PlanDoc, Task};
    use crate::core::types::{TaskOutput, TaskResult, TaskStatus};

    fn plan_of(tasks: Vec<Task>) -> Plan {
        validate_plan(PlanDoc {
            title: "demo".to_string(),
            overview: "o".to_string(),
            merge_notes: None,
            tasks,
        })
        .expect("valid plan")
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("{id} work"),
            prompt: "p".to_string(),
            depends_on: Vec::new(),
        }
    }

    fn finished(paths: &RunPaths, id: &str, exit_code: i32, done: bool) -> ExecutionRecord {
        ExecutionRecord::Finished(TaskResult {
            task_id: id.to_string(),
            branch: format!("acdx/run/{id}"),
            worktree: paths.worktree_path(id),
            exit_code,
            commit: done.then(|| "abc123".to_string()),
            result_path: paths.result_path(id),
            log_path: paths.log_path(id),
            output: done.then(|| TaskOutput {
                status: TaskStatus::Done,
                summary: "ok".to_string(),
                notes: None,
            }),
        })
    }

    #[test]
    fn layout_paths_are_partitioned_by_run_and_task() {
        let paths = RunPaths::new("/repo", "run-1");
        assert_eq!(
            paths.result_path("T01"),
            PathBuf::from("/repo/.auto-codex/runs/run-1/results/T01.json")
        );
        assert_eq!(
            paths.worktree_path("T02"),
            PathBuf::from("/repo/.auto-codex/worktrees/run-1/T02")
        );
        assert_eq!(
            paths.merge_result_path("T03"),
            PathBuf::from("/repo/.auto-codex/runs/run-1/merge/merge-T03.json")
        );
        assert_eq!(
            paths.dep_merge_context_path("T04", "T02"),
            PathBuf::from("/repo/.auto-codex/runs/run-1/dep-merges/T04/T02.md")
        );
    }

    #[test]
    fn ensure_schemas_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        ensure_schemas(&paths).expect("first");
        let written = fs::read_to_string(paths.plan_schema_path()).expect("read");
        ensure_schemas(&paths).expect("second");
        assert_eq!(
            fs::read_to_string(paths.plan_schema_path()).expect("read"),
            written
        );
    }

    #[test]
    fn summary_lists_status_per_task_and_fatal_cause() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let plan = plan_of(vec![task("T01"), task("T02")]);

        let mut records = BTreeMap::new();
        records.insert("T01".to_string(), finished(&paths, "T01", 0, true));
        records.insert("T02".to_string(), finished(&paths, "T02", 7, false));

        write_summary(&paths, &plan, &records, Some("task failures")).expect("write");
        let summary = fs::read_to_string(&paths.summary_path).expect("read");

        assert!(summary.contains("- T01 (T01 work) — OK — branch `acdx/run/T01` — commit `abc123`"));
        assert!(summary.contains("- T02 (T02 work) — FAIL(7)"));
        assert!(summary.contains("## Failure\n\ntask failures"));
        assert!(summary.contains(".auto-codex/runs/run-1/results/T01.json"));
    }

    #[test]
    fn summary_marks_schema_invalid_zero_exit_as_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let plan = plan_of(vec![task("T01")]);

        let mut records = BTreeMap::new();
        records.insert("T01".to_string(), finished(&paths, "T01", 0, false));

        write_summary(&paths, &plan, &records, None).expect("write");
        let summary = fs::read_to_string(&paths.summary_path).expect("read");
        assert!(summary.contains("FAIL(invalid-result)"));
    }
}
