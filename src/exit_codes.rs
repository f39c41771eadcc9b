//! Stable exit codes for auto-codex CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Precondition, configuration, or plan validation failure.
pub const INVALID: i32 = 1;
/// One or more tasks failed; integration was skipped.
pub const TASK_FAILED: i32 = 2;
/// Final integration failed (merge conflict residue or executor merge failure).
pub const INTEGRATION_FAILED: i32 = 3;
/// A post-merge quality gate failed (placeholder scan or test command).
pub const QUALITY_FAILED: i32 = 4;
