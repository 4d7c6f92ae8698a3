//! Historical execution traces (JSONL, one raw telemetry record per line).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::core::normalize::{normalize, now_ms};
use crate::core::types::{Source, TelemetryEvent};

/// Load and normalize a trace file. Malformed lines are logged and skipped.
#[instrument]
pub fn load_trace(path: &Path) -> Result<Vec<TelemetryEvent>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read trace {}", path.display()))?;
    Ok(parse_trace(&contents, now_ms()))
}

/// Normalize every record in `contents` with source `trace`.
///
/// Records without a timestamp get `received_at_ms` plus their zero-based line
/// index, keeping file order and distinct dedup keys.
pub fn parse_trace(contents: &str, received_at_ms: i64) -> Vec<TelemetryEvent> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<Value>(line) {
            Ok(raw) => normalize(&raw, Source::Trace, received_at_ms + index as i64),
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping unparseable trace line");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reconcile::StatusReconciler;
    use crate::core::types::NodeStatus;

    #[test]
    fn skips_blank_and_malformed_lines() {
        let contents = concat!(
            "{\"event_type\":\"node_started\",\"node_id\":\"a\",\"timestamp\":\"2024-05-01T12:00:00Z\"}\n",
            "\n",
            "{not json}\n",
            "{\"event_type\":\"node_completed\"}\n",
            "{\"event_type\":\"node_completed\",\"node_id\":\"a\"}\n",
        );
        let events = parse_trace(contents, 42);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.source == Source::Trace));
        assert_eq!(events[0].timestamp_ms, 1_714_564_800_000);
        assert_eq!(events[1].timestamp_ms, 46);
    }

    /// Untimestamped progress lines stay distinct and apply in file order.
    #[test]
    fn untimestamped_lines_keep_distinct_order() {
        let contents = concat!(
            "{\"event_type\":\"node_started\",\"node_id\":\"a\"}\n",
            "{\"event_type\":\"node_progress\",\"node_id\":\"a\",\"progress\":0.2}\n",
            "{\"event_type\":\"node_progress\",\"node_id\":\"a\",\"progress\":0.7}\n",
        );
        let events = parse_trace(contents, 42);
        let stamps: Vec<i64> = events.iter().map(|event| event.timestamp_ms).collect();
        assert_eq!(stamps, vec![42, 43, 44]);

        let mut reconciler = StatusReconciler::new();
        let summary = reconciler.reconcile(events);
        assert_eq!(summary.duplicates, 0);
        let state = reconciler.node("a").expect("state");
        assert_eq!(state.status, NodeStatus::Running);
        assert_eq!(state.progress, 0.7);
    }

    #[test]
    fn load_trace_reports_missing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_trace(&temp.path().join("absent.jsonl")).unwrap_err();
        assert!(err.to_string().contains("read trace"));
    }
}
