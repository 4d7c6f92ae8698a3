//! Render-state projection.
//!
//! Everything here is recomputed from the reconciler on every call; nothing
//! derived is cached across node status changes.

use serde::Serialize;

use crate::core::attribution::derive_agent_activity;
use crate::core::reconcile::StatusReconciler;
use crate::core::types::{AgentActivity, EdgeClass, NodeStatus, TokenUsage};
use crate::graph::WorkflowGraph;

/// Classify an edge from its endpoint statuses.
///
/// Checked in order, first match wins:
/// 1. `flowing`: source completed, target running or pending.
/// 2. `pending`: target pending, source running or completed.
/// 3. `active`: either endpoint running.
/// 4. `completed`: both endpoints completed.
/// 5. `idle`: everything else, including both idle.
pub fn classify_edge(source: NodeStatus, target: NodeStatus) -> EdgeClass {
    use crate::core::types::NodeStatus::{Completed, Pending, Running};

    match (source, target) {
        (Completed, Running | Pending) => EdgeClass::Flowing,
        (Running | Completed, Pending) => EdgeClass::Pending,
        (Running, _) | (_, Running) => EdgeClass::Active,
        (Completed, Completed) => EdgeClass::Completed,
        _ => EdgeClass::Idle,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeFrame {
    pub id: String,
    pub status: NodeStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub tokens: TokenUsage,
    pub cost: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentActivity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeFrame {
    pub id: String,
    pub source: String,
    pub target: String,
    pub class: EdgeClass,
}

/// Everything the renderer needs for one frame, in graph order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    pub execution_id: Option<String>,
    pub nodes: Vec<NodeFrame>,
    pub edges: Vec<EdgeFrame>,
}

/// Project the graph snapshot and current runtime state into a frame.
pub fn project(graph: &WorkflowGraph, reconciler: &StatusReconciler) -> RenderFrame {
    let nodes = graph
        .nodes
        .iter()
        .map(|node| {
            let agents = if node.agents.is_empty() {
                Vec::new()
            } else {
                derive_agent_activity(&node.id, reconciler.history(&node.id), &node.agents)
            };
            match reconciler.node(&node.id) {
                Some(state) => NodeFrame {
                    id: node.id.clone(),
                    status: state.status,
                    progress: state.progress,
                    message: state.message.clone(),
                    tokens: state.tokens,
                    cost: state.cost,
                    agents,
                },
                None => NodeFrame {
                    id: node.id.clone(),
                    status: NodeStatus::Idle,
                    progress: 0.0,
                    message: None,
                    tokens: TokenUsage::default(),
                    cost: 0.0,
                    agents,
                },
            }
        })
        .collect();

    let edges = graph
        .edges
        .iter()
        .map(|edge| EdgeFrame {
            id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            class: classify_edge(
                reconciler.status_of(&edge.source),
                reconciler.status_of(&edge.target),
            ),
        })
        .collect();

    RenderFrame {
        execution_id: reconciler.execution_id().map(str::to_string),
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AgentStatus;
    use crate::core::types::NodeStatus::{Completed, Failed, Idle, Pending, Running};
    use crate::test_support::{agent_node, edge, event, graph, node};

    #[test]
    fn classify_edge_table() {
        assert_eq!(classify_edge(Completed, Running), EdgeClass::Flowing);
        assert_eq!(classify_edge(Completed, Pending), EdgeClass::Flowing);
        assert_eq!(classify_edge(Running, Pending), EdgeClass::Pending);
        assert_eq!(classify_edge(Running, Idle), EdgeClass::Active);
        assert_eq!(classify_edge(Idle, Running), EdgeClass::Active);
        assert_eq!(classify_edge(Completed, Completed), EdgeClass::Completed);
        assert_eq!(classify_edge(Idle, Idle), EdgeClass::Idle);
        assert_eq!(classify_edge(Completed, Failed), EdgeClass::Idle);
    }

    /// Edge classes follow node status changes without any cached state.
    #[test]
    fn project_recomputes_edges_after_status_change() {
        let graph = graph(
            vec![node("a"), node("b")],
            vec![edge("e1", "a", "b")],
        );
        let mut reconciler = StatusReconciler::new();
        reconciler.apply(event("a", "node_started", 1));
        assert_eq!(project(&graph, &reconciler).edges[0].class, EdgeClass::Active);

        reconciler.apply(event("a", "node_completed", 2));
        reconciler.apply(event("b", "node_pending", 3));
        assert_eq!(project(&graph, &reconciler).edges[0].class, EdgeClass::Flowing);

        reconciler.apply(event("b", "node_completed", 4));
        let frame = project(&graph, &reconciler);
        assert_eq!(frame.edges[0].class, EdgeClass::Completed);
        assert_eq!(frame.nodes[1].progress, 1.0);
    }

    #[test]
    fn project_includes_agent_activity_for_rostered_nodes() {
        let graph = graph(
            vec![agent_node("crew", &["Research Specialist", "Writer"]), node("solo")],
            Vec::new(),
        );
        let mut reconciler = StatusReconciler::new();
        let mut thinking = event("crew", "agent_thinking", 1);
        thinking.agent_name = Some("Research Specialist".to_string());
        reconciler.apply(thinking);

        let frame = project(&graph, &reconciler);
        assert_eq!(frame.nodes[0].agents.len(), 2);
        assert_eq!(frame.nodes[0].agents[0].status, AgentStatus::Thinking);
        assert_eq!(frame.nodes[0].status, Idle);
        assert!(frame.nodes[1].agents.is_empty());
    }
}
