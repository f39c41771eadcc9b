//! Git adapter for the run lifecycle.
//!
//! The orchestrator drives branches, worktrees, and two merge protocols, so we
//! keep a small, explicit wrapper around `git` subprocess calls. Merge is the
//! one operation whose non-zero exit is data rather than an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, instrument, warn};

/// How a branch is merged into the current working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// `--no-ff --no-commit`: stage the merge, let the caller commit.
    NoFfNoCommit,
    /// `--no-ff --no-edit`: commit immediately with the default message.
    NoFfNoEdit,
}

impl MergeMode {
    fn args(self) -> &'static [&'static str] {
        match self {
            MergeMode::NoFfNoCommit => &["merge", "--no-ff", "--no-commit"],
            MergeMode::NoFfNoEdit => &["merge", "--no-ff", "--no-edit"],
        }
    }
}

/// Outcome of a merge attempt. Conflicts surface here, not as `Err`.
#[derive(Debug)]
pub struct MergeAttempt {
    pub exit_code: i32,
    pub output: String,
}

impl MergeAttempt {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Canonical repository root; fails when not inside a repository.
    pub fn root(&self) -> Result<PathBuf> {
        let out = self
            .run_capture(&["rev-parse", "--show-toplevel"])
            .context("not inside a git repository")?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// True iff the porcelain status output is empty (including untracked).
    pub fn is_clean(&self) -> Result<bool> {
        let out = self.run_capture(&["status", "--porcelain"])?;
        Ok(out.trim().is_empty())
    }

    /// Full sha of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Create a new branch at `base_ref` and materialize a working copy at `path`.
    #[instrument(skip_all, fields(branch, path = %path.display()))]
    pub fn worktree_add(&self, base_ref: &str, branch: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create worktree parent {}", parent.display()))?;
        }
        let path_arg = path.to_string_lossy();
        debug!(branch, "adding worktree");
        self.run_checked(&["worktree", "add", "-b", branch, &path_arg, base_ref])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Forced worktree removal.
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        self.run_checked(&["worktree", "remove", "--force", &path_arg])?;
        Ok(())
    }

    /// Drop stale worktree bookkeeping after manual removals.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// Forced branch delete. Returns false when the branch did not exist.
    pub fn branch_delete(&self, name: &str) -> Result<bool> {
        let out = self.run(&["branch", "-D", name])?;
        Ok(out.status.success())
    }

    /// Local branches matching a glob pattern, short names, sorted.
    pub fn list_branches(&self, pattern: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&[
            "branch",
            "--list",
            "--format=%(refname:short)",
            pattern,
        ])?;
        let mut names: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Attempt a merge. A conflicting merge is a normal `MergeAttempt` with a
    /// non-zero exit code; only a spawn failure is an `Err`.
    #[instrument(skip_all, fields(reference, mode = ?mode))]
    pub fn merge(&self, reference: &str, mode: MergeMode) -> Result<MergeAttempt> {
        let mut args: Vec<&str> = mode.args().to_vec();
        args.push(reference);
        let out = self.run(&args)?;
        let mut combined = String::from_utf8_lossy(&out.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));
        let attempt = MergeAttempt {
            exit_code: out.status.code().unwrap_or(-1),
            output: combined,
        };
        debug!(exit_code = attempt.exit_code, "merge attempted");
        Ok(attempt)
    }

    /// Best-effort merge abort; ignores failures (e.g. no merge in progress).
    pub fn merge_abort(&self) {
        match self.run(&["merge", "--abort"]) {
            Ok(out) if !out.status.success() => {
                debug!("merge --abort reported nothing to abort");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "merge --abort failed to spawn"),
        }
    }

    /// Paths still unmerged after a conflicting merge.
    pub fn unmerged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// File names changed between two commits.
    pub fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let range = format!("{from}..{to}");
        let out = self.run_capture(&["diff", "--name-only", &range])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stage all changes (respects ignore rules).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit with hooks disabled. The caller is responsible for only
    /// committing when there is something to commit (staged changes or a
    /// merge in progress).
    #[instrument(skip_all)]
    pub fn commit_no_verify(&self, message: &str) -> Result<()> {
        debug!("committing (no-verify)");
        self.run_checked(&["commit", "--no-verify", "-m", message])?;
        Ok(())
    }

    /// Append missing lines to the repository's local exclude file
    /// (`info/exclude`), shared by every worktree of the repository.
    pub fn append_local_excludes(&self, lines: &[&str]) -> Result<()> {
        let rel = self.run_capture(&["rev-parse", "--git-path", "info/exclude"])?;
        let rel = rel.trim();
        let path = if Path::new(rel).is_absolute() {
            PathBuf::from(rel)
        } else {
            self.workdir.join(rel)
        };

        let mut existing = String::new();
        if path.exists() {
            existing = fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
        }
        let mut contents = existing.clone();
        for line in lines {
            if !existing.lines().any(|l| l.trim() == *line) {
                if !contents.is_empty() && !contents.ends_with('\n') {
                    contents.push('\n');
                }
                contents.push_str(line);
                contents.push('\n');
            }
        }
        if contents != existing {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
