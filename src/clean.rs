//! `clean <run_id>`: remove every worktree and branch created by a run.
//!
//! Run artifacts under `.auto-codex/runs/` are the audit record and are left
//! alone. Cleaning an already-cleaned run is a no-op.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::naming::{sanitize_run_id, BRANCH_PREFIX};
use crate::io::artifacts::RunPaths;
use crate::io::git::Git;

/// What a clean pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanOutcome {
    pub removed_worktrees: usize,
    pub deleted_branches: usize,
}

/// Remove every worktree under `.auto-codex/worktrees/<run_id>/` and delete
/// the run's task branches.
#[instrument(skip_all, fields(run_id))]
pub fn clean_run(start_dir: &Path, run_id: &str) -> Result<CleanOutcome> {
    let repo_root = Git::new(start_dir).root()?;
    let git = Git::new(&repo_root);
    let paths = RunPaths::new(&repo_root, run_id);
    let mut outcome = CleanOutcome::default();

    if paths.worktrees_dir.exists() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&paths.worktrees_dir)
            .with_context(|| format!("read {}", paths.worktrees_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();

        for path in entries {
            if let Err(err) = git.worktree_remove(&path) {
                // Not a registered worktree (e.g. half-created); fall back to
                // plain directory removal.
                warn!(path = %path.display(), error = %format!("{err:#}"), "worktree remove failed; deleting directory");
                fs::remove_dir_all(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            }
            outcome.removed_worktrees += 1;
        }
        fs::remove_dir_all(&paths.worktrees_dir).ok();
        git.worktree_prune()?;
    }

    let pattern = format!("{BRANCH_PREFIX}/{}/*", sanitize_run_id(run_id));
    for branch in git.list_branches(&pattern)? {
        if git.branch_delete(&branch)? {
            outcome.deleted_branches += 1;
        }
    }

    info!(
        worktrees = outcome.removed_worktrees,
        branches = outcome.deleted_branches,
        "clean finished"
    );
    Ok(outcome)
}
