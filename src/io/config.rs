//! Orchestrator configuration stored at `.auto-codex/config.json`.
//!
//! The file is intended to be edited by humans and must remain stable and
//! automatable. Missing fields default to sensible values; unknown fields and
//! malformed values are rejected at load time.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Closed set of accepted reasoning-effort values (after lowercasing).
pub const REASONING_EFFORTS: [&str; 6] = ["none", "minimal", "low", "medium", "high", "xhigh"];

/// Executor sandbox policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
}

impl SandboxMode {
    pub fn as_flag(self) -> &'static str {
        match self {
            SandboxMode::ReadOnly => "read-only",
            SandboxMode::WorkspaceWrite => "workspace-write",
        }
    }
}

/// Web search policy for executor invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchMode {
    Cached,
    Live,
}

/// Placeholder quality gate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderMode {
    Off,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Default worker count (overridable on the CLI; clamped by the scheduler).
    pub agents: usize,
    pub commands: CommandsConfig,
    pub codex: CodexConfig,
    pub planning: PlanningConfig,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    pub setup: Option<String>,
    /// Run after a successful integration; non-zero fails the run.
    pub test: Option<String>,
    pub lint: Option<String>,
    pub format: Option<String>,
    pub build: Option<String>,
    /// If true, `test` runs via a shell; else it is split into argv.
    pub test_shell: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CodexConfig {
    pub model: String,
    pub sandbox: SandboxMode,
    pub web_search: WebSearchMode,
    /// Workspace network flag; only honored in workspace-write mode.
    pub network_access: bool,
    /// One of [`REASONING_EFFORTS`], case-insensitive in the file.
    pub reasoning_effort: String,
    pub full_auto: bool,
    /// Names of environment variables holding API keys; rotated per task.
    pub api_keys_env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PlanningConfig {
    pub ask_questions: bool,
    pub max_questions: u32,
    pub non_interactive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    pub placeholder_check: PlaceholderMode,
    /// Substrings scanned in changed files post-merge. Empty disables the
    /// gate regardless of mode.
    pub placeholder_tokens: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents: 4,
            commands: CommandsConfig::default(),
            codex: CodexConfig::default(),
            planning: PlanningConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            setup: None,
            test: None,
            lint: None,
            format: None,
            build: None,
            test_shell: false,
        }
    }
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5.2-codex".to_string(),
            sandbox: SandboxMode::WorkspaceWrite,
            web_search: WebSearchMode::Cached,
            network_access: false,
            reasoning_effort: "xhigh".to_string(),
            full_auto: true,
            api_keys_env: Vec::new(),
        }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            ask_questions: true,
            max_questions: 5,
            non_interactive: false,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            placeholder_check: PlaceholderMode::Off,
            placeholder_tokens: Vec::new(),
        }
    }
}

impl Config {
    /// Normalize and validate; fails fast on malformed values.
    pub fn validate(&mut self) -> Result<()> {
        self.codex.reasoning_effort = self.codex.reasoning_effort.to_lowercase();
        if !REASONING_EFFORTS.contains(&self.codex.reasoning_effort.as_str()) {
            return Err(anyhow!(
                "codex.reasoning_effort '{}' is not one of {:?}",
                self.codex.reasoning_effort,
                REASONING_EFFORTS
            ));
        }
        if let Some(test) = &self.commands.test {
            if test.trim().is_empty() {
                return Err(anyhow!("commands.test must not be blank when set"));
            }
        }
        for name in &self.codex.api_keys_env {
            if name.trim().is_empty() {
                return Err(anyhow!("codex.api_keys_env entries must be non-empty"));
            }
        }
        Ok(())
    }
}

/// Load config from a JSON file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let mut cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: Config =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Write config to disk (pretty JSON, trailing newline).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(cfg).context("serialize config json")?;
    buf.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
