//! Embedded JSON Schemas and validation helpers.
//!
//! The plan, task-result, and merge-result documents are validated against
//! these schemas both when the executor writes them (via `--output-schema`)
//! and again when the orchestrator reads them back.

use anyhow::{bail, Context, Result};
use jsonschema::Draft;
use serde_json::Value;

pub const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan.schema.json"
));
pub const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/task.schema.json"
));
pub const MERGE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/merge.schema.json"
));

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema_raw: &str) -> Result<()> {
    let schema_json: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema_json)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
