//! Plan document model and validation.
//!
//! A plan is a JSON document describing a DAG of tasks. Validation runs in a
//! fixed order (schema, id shape, uniqueness, dependency references, cycle
//! detection) so error messages are stable for a given bad input.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::schema::{validate_schema, PLAN_SCHEMA};

static TASK_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^T\d{2}$").unwrap());

/// One task as declared in the plan document. Immutable after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Raw plan document as produced by the planning executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDoc {
    pub title: String,
    pub overview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_notes: Option<String>,
    pub tasks: Vec<Task>,
}

/// A validated plan with its precomputed topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub title: String,
    pub overview: String,
    pub merge_notes: Option<String>,
    pub tasks: Vec<Task>,
    /// Deterministic topological order used for final integration.
    pub order: Vec<String>,
}

impl Plan {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

/// Parse and validate a plan: schema conformance, then semantic invariants.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let json: Value = serde_json::from_str(raw).context("parse plan json")?;
    validate_schema(&json, PLAN_SCHEMA).context("plan document")?;
    let doc: PlanDoc = serde_json::from_value(json).context("parse plan document")?;
    validate_plan(doc)
}

/// Validate a parsed plan document and compute its topological order.
pub fn validate_plan(doc: PlanDoc) -> Result<Plan> {
    if doc.tasks.is_empty() {
        bail!("plan invalid: tasks must be a non-empty list");
    }

    let mut known = BTreeSet::new();
    for task in &doc.tasks {
        if !TASK_ID_RE.is_match(&task.id) {
            bail!(
                "plan invalid: task id '{}' must match 'T' followed by two digits",
                task.id
            );
        }
        if !known.insert(task.id.as_str()) {
            bail!("plan invalid: duplicate task id '{}'", task.id);
        }
    }

    for task in &doc.tasks {
        for dep in &task.depends_on {
            if dep == &task.id {
                bail!("plan invalid: task '{}' depends on itself", task.id);
            }
            if !known.contains(dep.as_str()) {
                bail!(
                    "plan invalid: task '{}' depends on unknown task '{dep}'",
                    task.id
                );
            }
        }
    }

    let order = topological_order(&doc.tasks)?;
    Ok(Plan {
        title: doc.title,
        overview: doc.overview,
        merge_notes: doc.merge_notes,
        tasks: doc.tasks,
        order,
    })
}

/// Deterministic Kahn ordering: repeatedly pop the lexicographically smallest
/// ready node. Duplicate dependency entries count once.
fn topological_order(tasks: &[Task]) -> Result<Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for task in tasks {
        let deps: BTreeSet<&str> = task.depends_on.iter().map(String::as_str).collect();
        indegree.insert(task.id.as_str(), deps.len());
        for dep in deps {
            children.entry(dep).or_default().push(task.id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(id) = ready.iter().next().copied() {
        ready.remove(id);
        order.push(id.to_string());
        for &child in children.get(id).map(Vec::as_slice).unwrap_or_default() {
            let degree = indegree
                .get_mut(child)
                .expect("child ids come from validated tasks");
            *degree -= 1;
            if *degree == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| *id)
            .collect();
        bail!(
            "plan invalid: dependency cycle involving: {}",
            stuck.join(", ")
        );
    }
    Ok(order)
}
