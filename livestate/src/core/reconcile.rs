//! Runtime status reconciliation across push, pull and trace sources.
//!
//! Rules, applied per node:
//! - Status only moves forward through `idle → pending → running → terminal`.
//!   A forward move is accepted from any source, so a terminal report always
//!   beats a non-terminal one regardless of where it came from.
//! - Completed vs failed goes to the higher-precedence source
//!   (push > pull > trace).
//! - Progress while running goes to the newer timestamp. Reports for the same
//!   instant go to the higher-precedence source.
//! - Events are deduplicated by `(node_id, event_type, agent, timestamp_ms)`
//!   before any side effect, so re-delivery never double-counts tokens or cost.
//! - A new execution id clears everything.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::core::types::{EventKey, NodeRuntimeState, NodeStatus, TelemetryEvent};

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Status moved forward (or a terminal conflict was resolved).
    Advanced,
    /// Same status, fresher progress/message recorded.
    Updated,
    /// Accepted into history but no node-level change.
    Unchanged,
    /// Already seen this `(node_id, event_type, agent, timestamp)`.
    Duplicate,
    /// Older than the node's last event and changed nothing.
    Stale,
    /// Belongs to an execution id other than the current one.
    ForeignExecution,
}

/// Summary of one reconciliation pass.
///
/// Node id lists are sorted to keep outputs stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub advanced: Vec<String>,
    pub updated: Vec<String>,
    pub duplicates: usize,
    pub stale: usize,
    pub foreign: usize,
}

/// Owner of the per-execution `NodeRuntimeState` map.
#[derive(Debug, Default)]
pub struct StatusReconciler {
    execution_id: Option<String>,
    nodes: BTreeMap<String, NodeRuntimeState>,
    seen: HashSet<EventKey>,
    history: BTreeMap<String, Vec<TelemetryEvent>>,
}

impl StatusReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    /// Switch to `execution_id`, clearing all state if it differs from the
    /// current one. Returns true when a reset happened.
    pub fn start_execution(&mut self, execution_id: &str) -> bool {
        if self.execution_id.as_deref() == Some(execution_id) {
            return false;
        }
        debug!(
            previous = ?self.execution_id,
            execution_id = %execution_id,
            "resetting runtime state for new execution"
        );
        self.execution_id = Some(execution_id.to_string());
        self.nodes.clear();
        self.seen.clear();
        self.history.clear();
        true
    }

    pub fn apply(&mut self, event: TelemetryEvent) -> ApplyOutcome {
        if let Some(event_execution) = event.execution_id.as_deref() {
            match self.execution_id.as_deref() {
                None => self.execution_id = Some(event_execution.to_string()),
                Some(current) if current != event_execution => {
                    debug!(
                        node_id = %event.node_id,
                        execution_id = %event_execution,
                        current = %current,
                        "dropping event for foreign execution"
                    );
                    return ApplyOutcome::ForeignExecution;
                }
                Some(_) => {}
            }
        }

        if !self.seen.insert(event.key()) {
            debug!(node_id = %event.node_id, event_type = %event.event_type, "duplicate event");
            return ApplyOutcome::Duplicate;
        }

        let state = self
            .nodes
            .entry(event.node_id.clone())
            .or_insert_with(|| NodeRuntimeState::idle(&event.node_id, event.source));

        if let Some(tokens) = &event.tokens {
            state.tokens.add(tokens);
        }
        if let Some(cost) = event.cost {
            state.cost += cost;
        }

        let outcome = match merge(state, &event) {
            Some(next) => {
                let advanced = next.status != state.status;
                state.status = next.status;
                state.progress = next.progress;
                state.last_event_timestamp = next.last_event_timestamp;
                state.source_of_truth = next.source_of_truth;
                state.message = next.message;
                if advanced {
                    debug!(
                        node_id = %event.node_id,
                        status = %state.status,
                        source = ?event.source,
                        "node advanced"
                    );
                    ApplyOutcome::Advanced
                } else {
                    ApplyOutcome::Updated
                }
            }
            None if event.timestamp_ms < state.last_event_timestamp => ApplyOutcome::Stale,
            None => {
                state.last_event_timestamp = state.last_event_timestamp.max(event.timestamp_ms);
                ApplyOutcome::Unchanged
            }
        };

        self.history
            .entry(event.node_id.clone())
            .or_default()
            .push(event);
        outcome
    }

    /// Apply a batch of events as one pass.
    ///
    /// Events are ordered by timestamp, then by source precedence (highest
    /// first) so that lower-precedence duplicates of a moment become no-ops.
    pub fn reconcile(&mut self, mut events: Vec<TelemetryEvent>) -> ReconcileSummary {
        events.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then_with(|| b.source.precedence().cmp(&a.source.precedence()))
        });

        let mut summary = ReconcileSummary::default();
        for event in events {
            let node_id = event.node_id.clone();
            match self.apply(event) {
                ApplyOutcome::Advanced => summary.advanced.push(node_id),
                ApplyOutcome::Updated => summary.updated.push(node_id),
                ApplyOutcome::Unchanged => {}
                ApplyOutcome::Duplicate => summary.duplicates += 1,
                ApplyOutcome::Stale => summary.stale += 1,
                ApplyOutcome::ForeignExecution => summary.foreign += 1,
            }
        }
        summary.advanced.sort();
        summary.advanced.dedup();
        summary.updated.sort();
        summary.updated.dedup();
        summary
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeRuntimeState> {
        self.nodes.get(node_id)
    }

    /// Status of `node_id`; nodes that never received an event are idle.
    pub fn status_of(&self, node_id: &str) -> NodeStatus {
        self.nodes
            .get(node_id)
            .map_or(NodeStatus::Idle, |state| state.status)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRuntimeState> {
        self.nodes.values()
    }

    /// Every accepted event for `node_id`, in arrival order.
    pub fn history(&self, node_id: &str) -> &[TelemetryEvent] {
        self.history
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Compute the state `event` moves `current` to, or `None` if it changes nothing.
///
/// Token and cost accounting is not part of the merge; see [`StatusReconciler::apply`].
pub fn merge(current: &NodeRuntimeState, event: &TelemetryEvent) -> Option<NodeRuntimeState> {
    let target = event.target_status()?;
    let status = current.status;

    let accept_status = if target.rank() > status.rank() {
        true
    } else if target.is_terminal() && status.is_terminal() && target != status {
        event.source.precedence() > current.source_of_truth.precedence()
    } else {
        false
    };

    if accept_status {
        let progress = match target {
            NodeStatus::Completed => 1.0,
            _ => event.progress.unwrap_or(current.progress),
        };
        return Some(NodeRuntimeState {
            status: target,
            progress,
            last_event_timestamp: current.last_event_timestamp.max(event.timestamp_ms),
            source_of_truth: event.source,
            message: event.message.clone().or_else(|| current.message.clone()),
            ..current.clone()
        });
    }

    if target == status && status == NodeStatus::Running && is_fresher(current, event) {
        return Some(NodeRuntimeState {
            progress: event.progress.unwrap_or(current.progress),
            last_event_timestamp: event.timestamp_ms,
            source_of_truth: event.source,
            message: event.message.clone().or_else(|| current.message.clone()),
            ..current.clone()
        });
    }

    None
}

/// Newer timestamps win outright; precedence only breaks ties within one instant.
fn is_fresher(current: &NodeRuntimeState, event: &TelemetryEvent) -> bool {
    match event.timestamp_ms.cmp(&current.last_event_timestamp) {
        Ordering::Greater => true,
        Ordering::Equal => event.source.precedence() >= current.source_of_truth.precedence(),
        Ordering::Less => false,
    }
}
