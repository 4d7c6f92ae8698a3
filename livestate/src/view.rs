//! Per-execution live view: graph snapshot plus reconciled runtime state.
//!
//! All telemetry, whatever its source, enters through [`LiveView::ingest`] or
//! [`LiveView::ingest_trace`]; everything the renderer reads comes out of
//! [`LiveView::frame`], recomputed on each call.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::channel::{Subscription, TelemetryChannel};
use crate::core::attribution::{attribute, derive_agent_activity};
use crate::core::projection::{RenderFrame, project};
use crate::core::reconcile::{ApplyOutcome, ReconcileSummary, StatusReconciler};
use crate::core::types::{AgentActivity, EventScope, NodeRuntimeState, TelemetryEvent};
use crate::graph::WorkflowGraph;
use crate::io::transport::Transport;

#[derive(Debug, Default)]
pub struct LiveView {
    graph: WorkflowGraph,
    reconciler: StatusReconciler,
}

impl LiveView {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            reconciler: StatusReconciler::new(),
        }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Replace the graph snapshot (rosters included). Runtime state is kept.
    pub fn set_graph(&mut self, graph: WorkflowGraph) {
        self.graph = graph;
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.reconciler.execution_id()
    }

    /// Scope the view to `execution_id`, clearing runtime state if it changed.
    pub fn start_execution(&mut self, execution_id: &str) -> bool {
        self.reconciler.start_execution(execution_id)
    }

    pub fn ingest(&mut self, event: TelemetryEvent) -> ApplyOutcome {
        if event.scope == EventScope::Agent
            && let Some(node) = self.graph.node(&event.node_id)
            && !node.agents.is_empty()
            && attribute(&event, &node.agents).is_none()
        {
            debug!(
                node_id = %event.node_id,
                agent = ?event.agent_name,
                "agent event not attributable to any roster role"
            );
        }
        self.reconciler.apply(event)
    }

    /// Merge a batch of historical events in one pass.
    pub fn ingest_trace(&mut self, events: Vec<TelemetryEvent>) -> ReconcileSummary {
        self.reconciler.reconcile(events)
    }

    pub fn node_state(&self, node_id: &str) -> Option<&NodeRuntimeState> {
        self.reconciler.node(node_id)
    }

    /// Per-agent activity for one node, empty when it has no roster.
    pub fn agent_activity(&self, node_id: &str) -> Vec<AgentActivity> {
        match self.graph.node(node_id) {
            Some(node) if !node.agents.is_empty() => {
                derive_agent_activity(node_id, self.reconciler.history(node_id), &node.agents)
            }
            _ => Vec::new(),
        }
    }

    pub fn frame(&self) -> RenderFrame {
        project(&self.graph, &self.reconciler)
    }
}

/// Feed every event from `channel` into a shared view.
pub fn attach<T: Transport>(
    channel: &TelemetryChannel<T>,
    view: Arc<Mutex<LiveView>>,
) -> Subscription {
    channel.subscribe(move |event| {
        view.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ingest(event.clone());
    })
}
