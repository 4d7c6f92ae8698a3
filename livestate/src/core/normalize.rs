//! Boundary normalization of raw telemetry records.
//!
//! Push deltas, poll snapshots and trace lines all pass through here, so
//! downstream code only ever sees [`TelemetryEvent`].

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::{EventKind, EventScope, NodeStatus, Source, TelemetryEvent, TokenUsage};

/// Why a raw record was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum MalformedEvent {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("progress is not numeric: {0}")]
    InvalidProgress(String),
}

/// Normalize a raw record, logging and dropping it when malformed.
///
/// `received_at_ms` stands in for the timestamp when the record has none.
pub fn normalize(raw: &Value, source: Source, received_at_ms: i64) -> Option<TelemetryEvent> {
    match try_normalize(raw, source, received_at_ms) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, ?source, "dropping malformed telemetry record");
            None
        }
    }
}

pub fn try_normalize(
    raw: &Value,
    source: Source,
    received_at_ms: i64,
) -> Result<TelemetryEvent, MalformedEvent> {
    let obj = raw.as_object().ok_or(MalformedEvent::NotAnObject)?;

    let event_type = string_field(obj, &["event_type", "eventType"])
        .ok_or(MalformedEvent::MissingField("event_type"))?;
    let node_id =
        string_field(obj, &["node_id", "nodeId"]).ok_or(MalformedEvent::MissingField("node_id"))?;
    let progress = progress_field(obj)?;

    let timestamp_ms = match obj.get("timestamp") {
        None | Some(Value::Null) => received_at_ms,
        Some(value) => parse_timestamp(value).unwrap_or_else(|| {
            debug!(node_id = %node_id, raw = %value, "unparseable timestamp, using receipt time");
            received_at_ms
        }),
    };

    let data = obj.get("data").and_then(Value::as_object);
    let thought = data.and_then(|d| string_field(d, &["thought"]));
    let tool = data.and_then(tool_name);
    let tokens = data.and_then(|d| d.get("tokens_used")).and_then(token_usage);
    let cost = number_field(obj, "cost").or_else(|| data.and_then(|d| number_field(d, "cost")));

    Ok(TelemetryEvent {
        kind: EventKind::from_event_type(&event_type),
        scope: EventScope::from_event_type(&event_type),
        event_type,
        node_id,
        execution_id: string_field(obj, &["execution_id", "executionId"]),
        agent_name: string_field(obj, &["agent", "agent_name"]),
        task_name: string_field(obj, &["task", "task_name"]),
        progress,
        message: string_field(obj, &["message"]),
        thought,
        tool,
        timestamp_ms,
        tokens,
        cost,
        source,
    })
}

/// Receipt time for records that carry no timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Strictly increasing receipt time, so untimestamped records received in the
/// same millisecond never share a dedup key.
#[derive(Debug, Default)]
pub struct ReceiptClock {
    last: AtomicI64,
}

impl ReceiptClock {
    pub fn next(&self) -> i64 {
        let now = now_ms();
        let previous = match self.last.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        now.max(previous.saturating_add(1))
    }
}

/// Parse an ISO-8601 string (with or without offset) or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.timestamp_millis());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn number_field(obj: &Map<String, Value>, name: &str) -> Option<f64> {
    obj.get(name)
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite())
}

/// Numeric progress is clamped into `[0, 1]`; numeric strings are accepted.
fn progress_field(obj: &Map<String, Value>) -> Result<Option<f64>, MalformedEvent> {
    let raw = match obj.get("progress") {
        None | Some(Value::Null) => return Ok(None),
        Some(raw) => raw,
    };
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(v) if v.is_finite() => Ok(Some(v.clamp(0.0, 1.0))),
        _ => Err(MalformedEvent::InvalidProgress(raw.to_string())),
    }
}

fn tool_name(data: &Map<String, Value>) -> Option<String> {
    match data.get("tool")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(tool) => string_field(tool, &["name"]),
        _ => None,
    }
}

fn token_usage(raw: &Value) -> Option<TokenUsage> {
    if let Some(total) = raw.as_u64() {
        return Some(TokenUsage {
            prompt: 0,
            completion: 0,
            total,
        });
    }
    let obj = raw.as_object()?;
    let read = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| obj.get(*name).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    let prompt = read(&["prompt_tokens", "prompt", "input_tokens"]);
    let completion = read(&["completion_tokens", "completion", "output_tokens"]);
    let total = match read(&["total_tokens", "total"]) {
        0 => prompt + completion,
        total => total,
    };
    Some(TokenUsage {
        prompt,
        completion,
        total,
    })
}

/// Terminal outcome announced by an execution-level record
/// (`execution_completed`, `workflow_failed`, ...), if `raw` is one.
pub fn execution_outcome(raw: &Value) -> Option<NodeStatus> {
    let event_type = raw
        .as_object()
        .and_then(|obj| string_field(obj, &["event_type", "eventType"]))?
        .to_ascii_lowercase();
    if !(event_type.starts_with("execution_") || event_type.starts_with("workflow_")) {
        return None;
    }
    match EventKind::from_event_type(&event_type) {
        EventKind::Completed => Some(NodeStatus::Completed),
        EventKind::Failed => Some(NodeStatus::Failed),
        _ => None,
    }
}

/// Execution status carried by a poll snapshot.
pub fn snapshot_status(snapshot: &Value) -> Option<NodeStatus> {
    snapshot
        .get("status")
        .and_then(Value::as_str)
        .and_then(NodeStatus::parse)
}

/// Turn one poll snapshot into pull events shaped like push records.
///
/// A snapshot may name the current node (`node_id`, with `node_status`
/// falling back to the execution `status`) and/or carry a `nodes` map of
/// `{node_id: status}` or `{node_id: {status, progress}}`. Idle and unknown
/// statuses produce nothing.
pub fn poll_snapshot_events(
    snapshot: &Value,
    execution_id: &str,
    received_at_ms: i64,
) -> Vec<TelemetryEvent> {
    let Some(obj) = snapshot.as_object() else {
        warn!(%execution_id, "dropping non-object status snapshot");
        return Vec::new();
    };
    let timestamp = obj.get("timestamp").cloned().unwrap_or(Value::Null);
    let mut records = Vec::new();

    if let Some(node_id) = string_field(obj, &["node_id", "nodeId", "current_node"]) {
        let status = string_field(obj, &["node_status", "status"]);
        records.push(synthesize(
            &node_id,
            status.as_deref(),
            obj.get("progress"),
            obj.get("message"),
            &timestamp,
            execution_id,
        ));
    }

    if let Some(nodes) = obj.get("nodes").and_then(Value::as_object) {
        for (node_id, entry) in nodes {
            let (status, progress) = match entry {
                Value::String(status) => (Some(status.clone()), None),
                Value::Object(fields) => {
                    (string_field(fields, &["status"]), fields.get("progress"))
                }
                _ => (None, None),
            };
            records.push(synthesize(
                node_id,
                status.as_deref(),
                progress,
                None,
                &timestamp,
                execution_id,
            ));
        }
    }

    records
        .into_iter()
        .flatten()
        .filter_map(|record| normalize(&record, Source::Pull, received_at_ms))
        .collect()
}

fn synthesize(
    node_id: &str,
    status: Option<&str>,
    progress: Option<&Value>,
    message: Option<&Value>,
    timestamp: &Value,
    execution_id: &str,
) -> Option<Value> {
    let verb = match NodeStatus::parse(status?)? {
        NodeStatus::Idle => return None,
        NodeStatus::Pending => "queued",
        NodeStatus::Running if progress.is_some() => "progress",
        NodeStatus::Running => "started",
        NodeStatus::Completed => "completed",
        NodeStatus::Failed => "failed",
    };
    let mut record = Map::new();
    record.insert("event_type".into(), Value::String(format!("node_{}", verb)));
    record.insert("node_id".into(), Value::String(node_id.to_string()));
    record.insert("execution_id".into(), Value::String(execution_id.to_string()));
    record.insert("timestamp".into(), timestamp.clone());
    if let Some(progress) = progress {
        record.insert("progress".into(), progress.clone());
    }
    if let Some(message) = message {
        record.insert("message".into(), message.clone());
    }
    Some(Value::Object(record))
}
