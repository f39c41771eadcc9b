//! Initialization helpers for `.auto-codex/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::core::schema::{MERGE_SCHEMA, PLAN_SCHEMA, TASK_SCHEMA};
use crate::io::config::{write_config, Config};

/// Options for `init_scaffold`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing orchestrator-owned files.
    pub force: bool,
}

/// Canonical scaffold paths for a repository root.
#[derive(Debug, Clone)]
pub struct ScaffoldPaths {
    pub auto_dir: PathBuf,
    pub config_path: PathBuf,
    pub schemas_dir: PathBuf,
}

impl ScaffoldPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let auto_dir = root.into().join(".auto-codex");
        Self {
            config_path: auto_dir.join("config.json"),
            schemas_dir: auto_dir.join("schemas"),
            auto_dir,
        }
    }
}

/// Create `.auto-codex/` scaffolding in `root`: default config plus the
/// embedded plan/task/merge schemas.
///
/// Fails if `.auto-codex/` already exists unless `options.force` is set.
pub fn init_scaffold(root: &Path, options: &InitOptions) -> Result<ScaffoldPaths> {
    let paths = ScaffoldPaths::new(root);
    if paths.auto_dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .auto-codex already exists (use --force to overwrite)"
        ));
    }
    if paths.auto_dir.exists() && !paths.auto_dir.is_dir() {
        return Err(anyhow!("init: .auto-codex exists but is not a directory"));
    }

    fs::create_dir_all(&paths.schemas_dir)
        .with_context(|| format!("create directory {}", paths.schemas_dir.display()))?;

    write_config(&paths.config_path, &Config::default())?;
    for (name, contents) in [
        ("plan.schema.json", PLAN_SCHEMA),
        ("task.schema.json", TASK_SCHEMA),
        ("merge.schema.json", MERGE_SCHEMA),
    ] {
        let path = paths.schemas_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_config_and_schemas() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_scaffold(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.config_path.is_file());
        assert!(paths.schemas_dir.join("plan.schema.json").is_file());
        assert!(paths.schemas_dir.join("task.schema.json").is_file());
        assert!(paths.schemas_dir.join("merge.schema.json").is_file());

        let cfg = load_config(&paths.config_path).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_scaffold(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_scaffold(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_rewrites_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_scaffold(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "{}").expect("clobber");

        init_scaffold(temp.path(), &InitOptions { force: true }).expect("re-init");
        let cfg = load_config(&paths.config_path).expect("load");
        assert_eq!(cfg, Config::default());
    }
}
