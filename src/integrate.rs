//! Final integration: merge task branches onto the base branch in
//! topological order, then run the post-merge quality gates.
//!
//! Integration runs sequentially on the repository root working copy and
//! never touches task worktrees. Merges already committed on the base are not
//! rolled back when a later step fails; the failure is surfaced instead.

use std::collections::BTreeMap;
use std::fs;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::plan::Plan;
use crate::core::types::ExecutionRecord;
use crate::io::artifacts::RunPaths;
use crate::io::config::{Config, PlaceholderMode};
use crate::io::executor::Executor;
use crate::io::git::{Git, MergeMode};
use crate::io::prompt::{render_merge_context, TaskSummaryBlock};
use crate::merge_assist::{merge_with_assist, MergeArtifacts};

/// A merge step failed: conflicts survived executor assistance, the executor
/// merge call failed, or a merge failed without conflicts.
#[derive(Debug, Error)]
#[error("integration failed: {0}")]
pub struct IntegrationFailure(pub String);

/// A post-merge quality gate failed after all branches were merged.
#[derive(Debug, Error)]
#[error("quality gate failed: {0}")]
pub struct QualityGateFailure(pub String);

/// Result of a completed integration.
#[derive(Debug, Clone)]
pub struct IntegrationOutcome {
    /// Branches merged onto the base, in order.
    pub merged: Vec<String>,
    /// Base branch HEAD after integration.
    pub head: String,
}

/// Merge every committed task branch onto the base branch.
///
/// Precondition: every record succeeded (exit zero, schema-valid `done`
/// result). The merge order is the plan's topological order filtered to
/// tasks that produced a commit.
#[instrument(skip_all, fields(run_id = %paths.run_id))]
pub fn integrate<E: Executor>(
    git: &Git,
    executor: &E,
    config: &Config,
    paths: &RunPaths,
    plan: &Plan,
    records: &BTreeMap<String, ExecutionRecord>,
    api_key: Option<&str>,
) -> Result<IntegrationOutcome> {
    for (id, record) in records {
        if !record.succeeded() {
            return Err(anyhow!(
                "integration precondition violated: task {id} did not succeed"
            ));
        }
    }

    let base_branch = git.current_branch()?;
    let head_before = git.head_sha()?;
    let blocks = summary_blocks(plan, records);

    let mut merged = Vec::new();
    for id in &plan.order {
        let Some(result) = records.get(id).and_then(ExecutionRecord::task_result) else {
            continue;
        };
        if result.commit.is_none() {
            info!(task = %id, "no commit produced; skipping merge");
            continue;
        }
        let branch = result.branch.clone();
        let artifacts = MergeArtifacts {
            context_path: paths.merge_context_path.clone(),
            result_path: paths.merge_result_path(id),
            log_path: paths.merge_log_path(id),
            schema_path: paths.merge_schema_path(),
        };
        merge_with_assist(
            git,
            executor,
            config.codex.sandbox,
            api_key,
            &base_branch,
            &branch,
            MergeMode::NoFfNoCommit,
            &format!("Merge {branch}"),
            &artifacts,
            |files| render_merge_context(&paths.run_id, &branch, files, &blocks),
        )
        .map_err(|err| IntegrationFailure(format!("{err:#}")))?;
        info!(branch = %branch, "merged onto base");
        merged.push(branch);
    }

    let head = git.head_sha()?;
    placeholder_scan(git, config, &head_before, &head)?;
    run_test_command(git, config)?;

    Ok(IntegrationOutcome { merged, head })
}

fn summary_blocks(
    plan: &Plan,
    records: &BTreeMap<String, ExecutionRecord>,
) -> Vec<TaskSummaryBlock> {
    plan.order
        .iter()
        .filter_map(|id| {
            let result = records.get(id)?.task_result()?;
            let output = result.output.as_ref()?;
            let title = plan.task(id).map(|t| t.title.clone()).unwrap_or_default();
            Some(TaskSummaryBlock {
                id: id.clone(),
                title,
                summary: output.summary.clone(),
                notes: output.notes.clone(),
            })
        })
        .collect()
}

/// Scan files changed by the integration for configured placeholder tokens.
/// An empty token list disables the gate regardless of mode.
fn placeholder_scan(git: &Git, config: &Config, from: &str, to: &str) -> Result<()> {
    if config.quality.placeholder_check == PlaceholderMode::Off
        || config.quality.placeholder_tokens.is_empty()
    {
        return Ok(());
    }
    let mut findings = Vec::new();
    for file in git.changed_files(from, to)? {
        let path = git.workdir().join(&file);
        if !path.is_file() {
            continue;
        }
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        let contents = String::from_utf8_lossy(&bytes);
        for token in &config.quality.placeholder_tokens {
            if contents.contains(token.as_str()) {
                findings.push(format!("{file}: '{token}'"));
            }
        }
    }
    if findings.is_empty() {
        return Ok(());
    }
    match config.quality.placeholder_check {
        PlaceholderMode::Warn => {
            for finding in &findings {
                warn!(finding = %finding, "placeholder token in changed file");
            }
            Ok(())
        }
        PlaceholderMode::Fail => Err(QualityGateFailure(format!(
            "placeholder tokens found: {}",
            findings.join("; ")
        ))
        .into()),
        PlaceholderMode::Off => Ok(()),
    }
}

/// Run the configured test command with inherited stdio; non-zero fails the
/// run. No configured command means no gate.
fn run_test_command(git: &Git, config: &Config) -> Result<()> {
    let Some(test) = &config.commands.test else {
        return Ok(());
    };
    let mut cmd = if config.commands.test_shell {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(test);
        cmd
    } else {
        let mut parts = test.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("commands.test must not be blank"))?;
        let mut cmd = Command::new(program);
        cmd.args(parts);
        cmd
    };
    info!(command = %test, "running test command");
    let status = cmd
        .current_dir(git.workdir())
        .status()
        .with_context(|| format!("spawn test command `{test}`"))?;
    if !status.success() {
        return Err(QualityGateFailure(format!(
            "test command `{test}` exited with {:?}",
            status.code()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::{validate_plan, PlanDoc, Task};
    use crate::io::artifacts::{ensure_run_layout, ensure_schemas};
    use crate::io::config::QualityConfig;
    use crate::task_runner::{run_task, TaskRunContext};
    use crate::test_support::{
        is_merge_request, output_stem, write_merge_output, write_task_output, ScriptedExecutor,
        TestRepo,
    };
    use std::fs;
    use std::path::Path;
    use std::process::Command;

    fn plan_of(tasks: Vec<Task>) -> Plan {
        validate_plan(PlanDoc {
            title: "p".to_string(),
            overview: "overview".to_string(),
            merge_notes: None,
            tasks,
        })
        .expect("valid plan")
    }

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: format!("{id} work"),
            prompt: format!("{id} prompt"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn setup(repo: &TestRepo, run_id: &str) -> RunPaths {
        let paths = RunPaths::new(repo.root(), run_id);
        ensure_run_layout(&paths).expect("layout");
        ensure_schemas(&paths).expect("schemas");
        repo.git()
            .append_local_excludes(&[".auto-codex/runs/", ".auto-codex/worktrees/"])
            .expect("excludes");
        // Real repositories commit the scaffold after `init`; keep the base
        // clean so merges stage only task changes.
        repo.commit_all("chore: scaffold").expect("commit scaffold");
        paths
    }

    fn run_all(
        paths: &RunPaths,
        plan: &Plan,
        config: &Config,
        base: &str,
        executor: &ScriptedExecutor,
    ) -> BTreeMap<String, ExecutionRecord> {
        let ctx = TaskRunContext {
            paths,
            plan,
            goal: "goal",
            base_ref: base,
            config,
            executor,
        };
        let mut records = BTreeMap::new();
        for id in &plan.order {
            let result = run_task(&ctx, plan.task(id).unwrap(), None).expect("task");
            assert!(result.succeeded(), "setup task {id} must succeed");
            records.insert(id.clone(), ExecutionRecord::Finished(result));
        }
        records
    }

    fn log_messages(dir: &Path) -> Vec<String> {
        let out = Command::new("git")
            .args(["log", "--pretty=%s"])
            .current_dir(dir)
            .output()
            .expect("git log");
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn disjoint_executor() -> ScriptedExecutor {
        ScriptedExecutor::new(|req| {
            match output_stem(req).as_str() {
                "T01" => fs::write(req.workdir.join("one.txt"), "one\n")?,
                "T02" => fs::write(req.workdir.join("two.txt"), "two\n")?,
                other => panic!("unexpected request {other}"),
            }
            write_task_output(req, "done", "ok")?;
            Ok(0)
        })
    }

    #[test]
    fn merges_branches_in_topological_order() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T02", &[]), task("T01", &[])]);
        let config = Config::default();
        let base = repo.base_branch().expect("branch");
        let executor = disjoint_executor();

        let records = run_all(&paths, &plan, &config, &base, &executor);
        let outcome = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .expect("integrate");

        assert_eq!(
            outcome.merged,
            vec!["acdx/run-1/T01".to_string(), "acdx/run-1/T02".to_string()]
        );
        assert!(repo.root().join("one.txt").exists());
        assert!(repo.root().join("two.txt").exists());

        let messages = log_messages(repo.root());
        let t01_pos = messages.iter().position(|m| m == "Merge acdx/run-1/T01");
        let t02_pos = messages.iter().position(|m| m == "Merge acdx/run-1/T02");
        // git log is newest-first, so T02's merge appears before T01's.
        assert!(t02_pos.expect("T02 merge") < t01_pos.expect("T01 merge"));
    }

    #[test]
    fn refuses_to_integrate_failed_records() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[])]);
        let config = Config::default();

        let mut records = BTreeMap::new();
        records.insert(
            "T01".to_string(),
            ExecutionRecord::Errored("boom".to_string()),
        );

        let executor = ScriptedExecutor::new(|_| panic!("must not execute"));
        let err = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .unwrap_err();
        assert!(err.to_string().contains("precondition"));
    }

    #[test]
    fn tasks_without_commits_are_skipped() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[]), task("T02", &[])]);
        let config = Config::default();
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            if output_stem(req) == "T01" {
                fs::write(req.workdir.join("one.txt"), "one\n")?;
            }
            // T02 changes nothing.
            write_task_output(req, "done", "ok")?;
            Ok(0)
        });
        let records = run_all(&paths, &plan, &config, &base, &executor);
        assert!(records.get("T02").unwrap().task_result().unwrap().commit.is_none());

        let outcome = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .expect("integrate");
        assert_eq!(outcome.merged, vec!["acdx/run-1/T01".to_string()]);
    }

    #[test]
    fn conflicting_integration_is_resolved_by_the_executor() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[]), task("T02", &[])]);
        let config = Config::default();
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            if is_merge_request(req) {
                fs::write(req.workdir.join("README.md"), "merged both\n")?;
                write_merge_output(req, "combined edits")?;
                return Ok(0);
            }
            match output_stem(req).as_str() {
                "T01" => fs::write(req.workdir.join("README.md"), "from t01\n")?,
                "T02" => fs::write(req.workdir.join("README.md"), "from t02\n")?,
                other => panic!("unexpected request {other}"),
            }
            write_task_output(req, "done", "edited readme")?;
            Ok(0)
        });

        let records = run_all(&paths, &plan, &config, &base, &executor);
        let outcome = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .expect("integrate");
        assert_eq!(outcome.merged.len(), 2);

        let readme = fs::read_to_string(repo.root().join("README.md")).expect("read");
        assert_eq!(readme, "merged both\n");

        // MERGE_CONTEXT.md carries a block per task.
        let context = fs::read_to_string(&paths.merge_context_path).expect("context");
        assert!(context.contains("### T01: T01 work"));
        assert!(context.contains("### T02: T02 work"));
        assert!(paths.merge_result_path("T02").exists());
    }

    #[test]
    fn residual_markers_fail_and_keep_earlier_merges() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[]), task("T02", &[])]);
        let config = Config::default();
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            if is_merge_request(req) {
                fs::write(
                    req.workdir.join("README.md"),
                    "<<<<<<< HEAD\nfrom t01\n=======\nfrom t02\n>>>>>>> theirs\n",
                )?;
                write_merge_output(req, "left markers")?;
                return Ok(0);
            }
            match output_stem(req).as_str() {
                "T01" => fs::write(req.workdir.join("README.md"), "from t01\n")?,
                "T02" => fs::write(req.workdir.join("README.md"), "from t02\n")?,
                other => panic!("unexpected request {other}"),
            }
            write_task_output(req, "done", "edited readme")?;
            Ok(0)
        });

        let records = run_all(&paths, &plan, &config, &base, &executor);
        let head_before = repo.git().head_sha().expect("sha");
        let err = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .unwrap_err();
        assert!(err.downcast_ref::<IntegrationFailure>().is_some());
        assert!(err.to_string().contains("conflict markers"));

        // T01's merge stays on the base; the aborted T02 merge left no residue.
        let messages = log_messages(repo.root());
        assert!(messages.iter().any(|m| m == "Merge acdx/run-1/T01"));
        assert!(!messages.iter().any(|m| m == "Merge acdx/run-1/T02"));
        assert_ne!(repo.git().head_sha().expect("sha"), head_before);
        assert!(repo.git().is_clean().expect("status"));
    }

    #[test]
    fn placeholder_fail_mode_rejects_tokens_in_changed_files() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[])]);
        let config = Config {
            quality: QualityConfig {
                placeholder_check: PlaceholderMode::Fail,
                placeholder_tokens: vec!["TODO-PLACEHOLDER".to_string()],
            },
            ..Config::default()
        };
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            fs::write(req.workdir.join("one.txt"), "work TODO-PLACEHOLDER\n")?;
            write_task_output(req, "done", "ok")?;
            Ok(0)
        });
        let records = run_all(&paths, &plan, &config, &base, &executor);

        let err = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .unwrap_err();
        assert!(err.downcast_ref::<QualityGateFailure>().is_some());
        assert!(err.to_string().contains("TODO-PLACEHOLDER"));
    }

    #[test]
    fn placeholder_gate_with_empty_tokens_is_a_noop() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[])]);
        let config = Config {
            quality: QualityConfig {
                placeholder_check: PlaceholderMode::Fail,
                placeholder_tokens: Vec::new(),
            },
            ..Config::default()
        };
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            fs::write(req.workdir.join("one.txt"), "anything\n")?;
            write_task_output(req, "done", "ok")?;
            Ok(0)
        });
        let records = run_all(&paths, &plan, &config, &base, &executor);
        integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .expect("integrate");
    }

    #[test]
    fn failing_test_command_fails_the_run() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[])]);
        let config = Config {
            commands: crate::io::config::CommandsConfig {
                test: Some("false".to_string()),
                ..Default::default()
            },
            ..Config::default()
        };
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            fs::write(req.workdir.join("one.txt"), "one\n")?;
            write_task_output(req, "done", "ok")?;
            Ok(0)
        });
        let records = run_all(&paths, &plan, &config, &base, &executor);

        let err = integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .unwrap_err();
        assert!(err.downcast_ref::<QualityGateFailure>().is_some());
        assert!(err.to_string().contains("test command"));
    }

    #[test]
    fn passing_test_command_keeps_the_run_green() {
        let repo = TestRepo::new().expect("repo");
        let paths = setup(&repo, "run-1");
        let plan = plan_of(vec![task("T01", &[])]);
        let config = Config {
            commands: crate::io::config::CommandsConfig {
                test: Some("ls one.txt".to_string()),
                test_shell: true,
                ..Default::default()
            },
            ..Config::default()
        };
        let base = repo.base_branch().expect("branch");

        let executor = ScriptedExecutor::new(|req| {
            fs::write(req.workdir.join("one.txt"), "one\n")?;
            write_task_output(req, "done", "ok")?;
            Ok(0)
        });
        let records = run_all(&paths, &plan, &config, &base, &executor);
        integrate(&repo.git(), &executor, &config, &paths, &plan, &records, None)
            .expect("integrate");
    }
}
