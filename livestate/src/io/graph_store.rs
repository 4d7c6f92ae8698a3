//! Graph document read snapshot / write back, with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::instrument;

use crate::core::invariants::validate_graph;
use crate::graph::WorkflowGraph;

/// JSON Schema (Draft 2020-12) for graph documents.
pub const GRAPH_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/graph.v1.schema.json"
));

/// Load and validate a graph document from disk (schema + invariants).
#[instrument]
pub fn load_graph(path: &Path) -> Result<WorkflowGraph> {
    let raw = fs::read_to_string(path).with_context(|| format!("read graph {}", path.display()))?;
    parse_graph(&raw).with_context(|| format!("load graph {}", path.display()))
}

/// Parse and validate a graph document: schema conformance + semantic invariants.
pub fn parse_graph(raw: &str) -> Result<WorkflowGraph> {
    let value: Value = serde_json::from_str(raw).context("parse graph json")?;
    validate_schema(&value)?;
    let graph: WorkflowGraph = serde_json::from_value(value).context("deserialize graph")?;
    let errors = validate_graph(&graph);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(graph)
}

/// Atomically write a graph document (temp file + rename), pretty-printed.
pub fn write_graph(path: &Path, graph: &WorkflowGraph) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(graph).context("serialize graph")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(GRAPH_SCHEMA).context("parse graph schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
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
