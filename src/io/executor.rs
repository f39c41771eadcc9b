//! Executor abstraction for codex invocations.
//!
//! The [`Executor`] trait decouples the run lifecycle from the actual agent
//! backend (`codex exec`). Tests use scripted executors that return
//! predetermined outputs without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::schema::{validate_schema, MERGE_SCHEMA, TASK_SCHEMA};
use crate::core::types::{MergeOutput, TaskOutput};
use crate::io::config::{CodexConfig, SandboxMode, WebSearchMode};
use crate::io::process::run_stream_to_log;

/// Parameters for one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// Sandbox mode for this invocation (planning is read-only, task and
    /// merge work is workspace-write).
    pub sandbox: SandboxMode,
    /// Path to the JSON Schema that constrains agent output.
    pub output_schema_path: PathBuf,
    /// Path where the agent must write its output JSON.
    pub output_path: PathBuf,
    /// Path receiving the mirrored executor stdout/stderr.
    pub log_path: PathBuf,
    /// Maximum time to wait for the executor, if bounded.
    pub timeout: Option<Duration>,
    /// API key exported to the child as `OPENAI_API_KEY`, when rotated.
    pub api_key: Option<String>,
}

/// Abstraction over agent execution backends.
///
/// Returns the child exit code; the caller decides what non-zero means.
pub trait Executor {
    fn exec(&self, request: &ExecRequest) -> Result<i32>;
}

/// Executor that spawns `codex exec` with flags assembled from configuration.
#[derive(Debug, Clone)]
pub struct CodexExecutor {
    codex: CodexConfig,
}

impl CodexExecutor {
    pub fn new(codex: CodexConfig) -> Self {
        Self { codex }
    }

    fn build_command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("--sandbox")
            .arg(request.sandbox.as_flag());
        if self.codex.full_auto {
            cmd.arg("--full-auto");
        }
        cmd.arg("--model").arg(&self.codex.model);
        cmd.arg("-c")
            .arg(format!("model_reasoning_effort={}", self.codex.reasoning_effort));
        if self.codex.web_search == WebSearchMode::Live {
            cmd.arg("-c").arg("tools.web_search=true");
        }
        if self.codex.network_access && request.sandbox == SandboxMode::WorkspaceWrite {
            cmd.arg("-c").arg("sandbox_workspace_write.network_access=true");
        }
        cmd.arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("--skip-git-repo-check")
            .arg("-")
            .current_dir(&request.workdir);
        if let Some(key) = &request.api_key {
            cmd.env("OPENAI_API_KEY", key);
        }
        cmd
    }
}

impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(sandbox = request.sandbox.as_flag()))]
    fn exec(&self, request: &ExecRequest) -> Result<i32> {
        info!(workdir = %request.workdir.display(), "starting codex exec");

        if !request.output_schema_path.exists() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let cmd = self.build_command(request);
        let header = format!(
            "workdir: {}\ncommand: {}\n\n",
            request.workdir.display(),
            format_command(&cmd)
        );

        let output = run_stream_to_log(
            cmd,
            Some(request.prompt.as_bytes()),
            &request.log_path,
            &header,
            request.timeout,
        )
        .context("run codex exec")?;

        if output.timed_out {
            warn!("codex exec timed out");
            return Err(anyhow!(
                "codex exec timed out after {:?}",
                request.timeout.unwrap_or_default()
            ));
        }

        debug!(exit_code = output.exit_code(), "codex exec finished");
        Ok(output.exit_code())
    }
}

/// Shell-style rendering of a command line for log headers.
pub fn format_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    for arg in cmd.get_args() {
        let arg = arg.to_string_lossy();
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("'{arg}'"));
        } else {
            parts.push(arg.to_string());
        }
    }
    parts.join(" ")
}

/// Read a task result document; errors when absent, unparseable, or
/// schema-invalid.
pub fn load_task_output(path: &Path) -> Result<TaskOutput> {
    load_validated(path, TASK_SCHEMA)
}

/// Read a merge resolution document; errors when absent, unparseable, or
/// schema-invalid.
pub fn load_merge_output(path: &Path) -> Result<MergeOutput> {
    load_validated(path, MERGE_SCHEMA)
}

fn load_validated<T: DeserializeOwned>(path: &Path, schema: &str) -> Result<T> {
    if !path.exists() {
        return Err(anyhow!("missing executor output {}", path.display()));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read executor output {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    validate_schema(&value, schema).with_context(|| format!("validate {}", path.display()))?;
    let parsed = serde_json::from_value(value).with_context(|| format!("parse {}", path.display()))?;
    Ok(parsed)
}
