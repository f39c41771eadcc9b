//! Run identifiers and branch naming.
//!
//! Every branch and artifact path created by a run embeds the run id, so the
//! id must be filesystem- and refname-safe after sanitization.

use chrono::Local;

/// Prefix for every branch created by the orchestrator.
pub const BRANCH_PREFIX: &str = "acdx";

/// Generate a new run id from local wall-clock time plus a random suffix.
///
/// Shape: `YYYYmmdd-HHMMSS-xxxx` (4 hex digits of entropy). Uniqueness is
/// local to the repository; collisions within the same second are covered by
/// the suffix.
pub fn generate_run_id() -> String {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let suffix: u16 = rand::random();
    format!("{stamp}-{suffix:04x}")
}

/// Sanitize a run id for use in a branch name.
///
/// Keeps `[A-Za-z0-9._-]`, replaces every other character with `-`.
pub fn sanitize_run_id(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Branch name for a task: `acdx/<sanitizedRunId>/<taskId>`.
pub fn task_branch(run_id: &str, task_id: &str) -> String {
    format!("{BRANCH_PREFIX}/{}/{task_id}", sanitize_run_id(run_id))
}
