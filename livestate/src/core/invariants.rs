//! Semantic invariants of the graph document not expressible via JSON Schema.

use std::collections::HashSet;

use crate::graph::WorkflowGraph;

/// Check semantic invariants not expressible in JSON Schema:
/// - No duplicate node, edge or group ids
/// - Edge endpoints reference existing nodes
/// - Group members reference existing nodes, without repeats
/// - Groups have at least two members
pub fn validate_graph(graph: &WorkflowGraph) -> Vec<String> {
    let mut errors = Vec::new();

    let mut node_ids = HashSet::new();
    for node in &graph.nodes {
        if !node_ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id '{}'", node.id));
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in &graph.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(format!("duplicate edge id '{}'", edge.id));
        }
        for (end, id) in [("source", &edge.source), ("target", &edge.target)] {
            if !node_ids.contains(id.as_str()) {
                errors.push(format!("edge '{}': unknown {} node '{}'", edge.id, end, id));
            }
        }
    }

    let mut group_ids = HashSet::new();
    for group in &graph.groups {
        if !group_ids.insert(group.id.as_str()) {
            errors.push(format!("duplicate group id '{}'", group.id));
        }
        let mut members = HashSet::new();
        for member in &group.member_node_ids {
            if !members.insert(member.as_str()) {
                errors.push(format!("group '{}': member '{}' listed twice", group.id, member));
            }
            if !node_ids.contains(member.as_str()) {
                errors.push(format!("group '{}': unknown member node '{}'", group.id, member));
            }
        }
        if members.len() < 2 {
            errors.push(format!("group '{}': needs at least 2 members", group.id));
        }
    }

    errors
}
