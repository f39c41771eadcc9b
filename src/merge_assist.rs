//! Merge-with-executor-assist, shared by both merge protocols.
//!
//! Dependency pre-merge and final integration differ only in merge flags,
//! commit message, and context document. The conflict path is identical:
//! write a context document, ask the executor to resolve in place, re-verify
//! (marker scan, unmerged re-check), then commit. Any residue aborts the
//! in-progress merge and fails the caller.

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::io::artifacts::write_text;
use crate::io::config::SandboxMode;
use crate::io::executor::{load_merge_output, ExecRequest, Executor};
use crate::io::git::{Git, MergeMode};
use crate::io::prompt::render_merge_prompt;

static CONFLICT_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(<<<<<<<|=======|>>>>>>>)").unwrap());

/// True when `text` still contains a git conflict marker at a line start.
pub fn has_conflict_markers(text: &str) -> bool {
    CONFLICT_MARKER_RE.is_match(text)
}

/// Artifact paths for one assisted merge.
#[derive(Debug, Clone)]
pub struct MergeArtifacts {
    pub context_path: PathBuf,
    pub result_path: PathBuf,
    pub log_path: PathBuf,
    pub schema_path: PathBuf,
}

/// One merge of `branch` into the working copy behind `git`, with executor
/// assistance on conflicts.
///
/// `build_context` renders the context document from the conflicted file
/// list; it is only called when the merge actually conflicts.
#[instrument(skip_all, fields(branch, mode = ?mode))]
pub fn merge_with_assist<E: Executor>(
    git: &Git,
    executor: &E,
    sandbox: SandboxMode,
    api_key: Option<&str>,
    target: &str,
    branch: &str,
    mode: MergeMode,
    commit_message: &str,
    artifacts: &MergeArtifacts,
    build_context: impl FnOnce(&[String]) -> Result<String>,
) -> Result<()> {
    let attempt = git.merge(branch, mode)?;
    if attempt.success() {
        if mode == MergeMode::NoFfNoCommit {
            git.commit_no_verify(commit_message)?;
        }
        debug!(branch, "merged cleanly");
        return Ok(());
    }

    let files = git.unmerged_paths()?;
    if files.is_empty() {
        git.merge_abort();
        bail!(
            "merge of {branch} failed without conflicts: {}",
            attempt.output.trim()
        );
    }
    info!(branch, conflicts = files.len(), "merge conflicted; delegating to executor");

    let context_doc = build_context(&files)?;
    write_text(&artifacts.context_path, &context_doc)?;

    let prompt = render_merge_prompt(
        branch,
        target,
        &files,
        &artifacts.context_path.display().to_string(),
    )?;
    let request = ExecRequest {
        workdir: git.workdir().to_path_buf(),
        prompt,
        sandbox,
        output_schema_path: artifacts.schema_path.clone(),
        output_path: artifacts.result_path.clone(),
        log_path: artifacts.log_path.clone(),
        timeout: None,
        api_key: api_key.map(str::to_string),
    };
    let exit_code = match executor.exec(&request) {
        Ok(code) => code,
        Err(err) => {
            git.merge_abort();
            return Err(err.context(format!("executor merge for {branch}")));
        }
    };
    if exit_code != 0 {
        git.merge_abort();
        bail!("executor merge for {branch} exited with {exit_code}");
    }
    if let Err(err) = load_merge_output(&artifacts.result_path) {
        git.merge_abort();
        return Err(err.context(format!("executor merge result for {branch}")));
    }

    // Re-scan every originally-conflicted file. A file deleted by the
    // resolution counts as resolved.
    for file in &files {
        let path = git.workdir().join(file);
        if !path.exists() {
            continue;
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        if has_conflict_markers(&contents) {
            warn!(file = %file, "conflict markers remain after executor resolution");
            git.merge_abort();
            bail!("unresolved conflict markers remain in {file} after merging {branch}");
        }
    }

    git.add_all()?;
    let still_unmerged = git.unmerged_paths()?;
    if !still_unmerged.is_empty() {
        git.merge_abort();
        bail!(
            "paths remain unmerged after resolving {branch}: {}",
            still_unmerged.join(", ")
        );
    }

    git.commit_no_verify(commit_message)?;
    info!(branch, "conflicted merge resolved and committed");
    Ok(())
}
