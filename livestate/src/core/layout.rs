//! Deterministic whole-graph layout.
//!
//! Every mode depends only on the input order of nodes and edges; runtime
//! state is never consulted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::f64::consts::PI;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::graph::{GraphEdge, GraphNode, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Horizontal,
    Vertical,
    Radial,
    Hierarchical,
}

impl FromStr for LayoutMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "horizontal" => Ok(LayoutMode::Horizontal),
            "vertical" => Ok(LayoutMode::Vertical),
            "radial" => Ok(LayoutMode::Radial),
            "hierarchical" | "topological" => Ok(LayoutMode::Hierarchical),
            other => Err(format!(
                "unknown layout mode '{}' (expected horizontal, vertical, radial or hierarchical)",
                other
            )),
        }
    }
}

/// Geometry constants for all layout modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub node_width: f64,
    pub node_height: f64,
    /// Gap between neighbours in linear layouts.
    pub padding: f64,
    /// Start of linear layouts and top of hierarchical layouts.
    pub origin: Position,
    /// Radial center; hierarchical levels are centered on `center.x`.
    pub center: Position,
    pub radius: f64,
    /// Distance between hierarchical levels.
    pub level_pitch: f64,
    /// Distance between nodes within a hierarchical level.
    pub sibling_pitch: f64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            node_width: 200.0,
            node_height: 80.0,
            padding: 50.0,
            origin: Position::new(100.0, 100.0),
            center: Position::new(400.0, 300.0),
            radius: 250.0,
            level_pitch: 150.0,
            sibling_pitch: 250.0,
        }
    }
}

/// Compute a position for every node.
pub fn layout(
    nodes: &[GraphNode],
    edges: &[GraphEdge],
    mode: LayoutMode,
    params: &LayoutParams,
) -> BTreeMap<String, Position> {
    match mode {
        LayoutMode::Horizontal => {
            let pitch = params.node_width + params.padding;
            linear(nodes, |i| params.origin.offset(i * pitch, 0.0))
        }
        LayoutMode::Vertical => {
            let pitch = params.node_height + params.padding;
            linear(nodes, |i| params.origin.offset(0.0, i * pitch))
        }
        LayoutMode::Radial => radial(nodes, params),
        LayoutMode::Hierarchical => hierarchical(nodes, edges, params),
    }
}

fn linear(nodes: &[GraphNode], place: impl Fn(f64) -> Position) -> BTreeMap<String, Position> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.clone(), place(i as f64)))
        .collect()
}

fn radial(nodes: &[GraphNode], params: &LayoutParams) -> BTreeMap<String, Position> {
    let n = nodes.len() as f64;
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let angle = 2.0 * PI * i as f64 / n;
            let position = params.center.offset(
                params.radius * angle.cos(),
                params.radius * angle.sin(),
            );
            (node.id.clone(), position)
        })
        .collect()
}

fn hierarchical(
    nodes: &[GraphNode],
    edges: &[GraphEdge],
    params: &LayoutParams,
) -> BTreeMap<String, Position> {
    let mut positions = BTreeMap::new();
    for (depth, level) in hierarchical_levels(nodes, edges).iter().enumerate() {
        let y = params.origin.y + depth as f64 * params.level_pitch;
        let half_span = (level.len() as f64 - 1.0) / 2.0;
        for (i, id) in level.iter().enumerate() {
            let x = params.center.x + (i as f64 - half_span) * params.sibling_pitch;
            positions.insert(id.clone(), Position::new(x, y));
        }
    }
    positions
}

/// Group nodes into topological levels by layered BFS from the roots.
///
/// Level 0 holds nodes with no incoming edge. Level k+1 holds the nodes whose
/// incoming edges all start in levels 0..=k. Nodes that can never be leveled
/// (cycles, or anything downstream of one) land together in one final
/// overflow level, in input order. That overflow level is the defined result
/// for cyclic input, not an error. Edges referencing unknown nodes are
/// ignored. Within a level, nodes keep input order.
pub fn hierarchical_levels(nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<Vec<String>> {
    let known: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
    let mut parents: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if known.contains(edge.source.as_str()) && known.contains(edge.target.as_str()) {
            parents
                .entry(edge.target.as_str())
                .or_default()
                .push(edge.source.as_str());
        }
    }

    let mut leveled: HashSet<&str> = HashSet::new();
    let mut levels: Vec<Vec<String>> = Vec::new();

    loop {
        let next: Vec<&str> = nodes
            .iter()
            .map(|node| node.id.as_str())
            .filter(|id| !leveled.contains(id))
            .filter(|id| {
                parents
                    .get(id)
                    .is_none_or(|sources| sources.iter().all(|source| leveled.contains(source)))
            })
            .collect();
        if next.is_empty() {
            break;
        }
        leveled.extend(next.iter().copied());
        levels.push(next.into_iter().map(str::to_string).collect());
    }

    let overflow: Vec<String> = nodes
        .iter()
        .filter(|node| !leveled.contains(node.id.as_str()))
        .map(|node| node.id.clone())
        .collect();
    if !overflow.is_empty() {
        levels.push(overflow);
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{edge, node};

    fn ids(levels: &[Vec<String>]) -> Vec<Vec<&str>> {
        levels
            .iter()
            .map(|level| level.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn levels_follow_topological_depth() {
        let nodes = vec![node("A"), node("B"), node("C"), node("D")];
        let edges = vec![edge("1", "A", "B"), edge("2", "A", "C"), edge("3", "B", "D")];
        let levels = hierarchical_levels(&nodes, &edges);
        assert_eq!(ids(&levels), vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    /// A node waits until every parent is leveled, so it sits below all ancestors.
    #[test]
    fn levels_wait_for_all_parents() {
        let nodes = vec![node("D"), node("A"), node("B"), node("C")];
        let edges = vec![
            edge("1", "A", "B"),
            edge("2", "B", "C"),
            edge("3", "A", "D"),
            edge("4", "C", "D"),
        ];
        let levels = hierarchical_levels(&nodes, &edges);
        assert_eq!(ids(&levels), vec![vec!["A"], vec!["B"], vec!["C"], vec!["D"]]);
    }

    /// Cycles go to a single overflow level instead of looping or disappearing.
    #[test]
    fn cycles_land_in_overflow_level() {
        let nodes = vec![node("root"), node("x"), node("y"), node("after")];
        let edges = vec![
            edge("1", "root", "x"),
            edge("2", "x", "y"),
            edge("3", "y", "x"),
            edge("4", "y", "after"),
        ];
        let levels = hierarchical_levels(&nodes, &edges);
        assert_eq!(ids(&levels), vec![vec!["root"], vec!["x", "y", "after"]]);
    }

    #[test]
    fn pure_cycle_is_entirely_overflow() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("1", "a", "b"), edge("2", "b", "a"), edge("3", "b", "ghost")];
        let levels = hierarchical_levels(&nodes, &edges);
        assert_eq!(ids(&levels), vec![vec!["a", "b"]]);
    }

    #[test]
    fn hierarchical_positions_center_each_level() {
        let nodes = vec![node("A"), node("B"), node("C")];
        let edges = vec![edge("1", "A", "B"), edge("2", "A", "C")];
        let params = LayoutParams::default();
        let positions = layout(&nodes, &edges, LayoutMode::Hierarchical, &params);

        assert_eq!(positions["A"], Position::new(400.0, 100.0));
        assert_eq!(positions["B"], Position::new(275.0, 250.0));
        assert_eq!(positions["C"], Position::new(525.0, 250.0));
    }

    #[test]
    fn linear_layouts_use_fixed_pitch() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let params = LayoutParams::default();

        let horizontal = layout(&nodes, &[], LayoutMode::Horizontal, &params);
        assert_eq!(horizontal["c"], Position::new(100.0 + 2.0 * 250.0, 100.0));

        let vertical = layout(&nodes, &[], LayoutMode::Vertical, &params);
        assert_eq!(vertical["b"], Position::new(100.0, 100.0 + 130.0));
    }

    #[test]
    fn radial_spaces_nodes_evenly() {
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let params = LayoutParams::default();
        let positions = layout(&nodes, &[], LayoutMode::Radial, &params);

        let close = |p: Position, x: f64, y: f64| (p.x - x).abs() < 1e-9 && (p.y - y).abs() < 1e-9;
        assert!(close(positions["a"], 650.0, 300.0));
        assert!(close(positions["b"], 400.0, 550.0));
        assert!(close(positions["c"], 150.0, 300.0));
        assert!(close(positions["d"], 400.0, 50.0));
    }

    #[test]
    fn parses_layout_modes() {
        assert_eq!("Radial".parse::<LayoutMode>(), Ok(LayoutMode::Radial));
        assert_eq!("topological".parse::<LayoutMode>(), Ok(LayoutMode::Hierarchical));
        assert!("spiral".parse::<LayoutMode>().is_err());
    }

    /// Same input, same output, every time.
    #[test]
    fn layout_is_deterministic() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("1", "a", "c")];
        let params = LayoutParams::default();
        let first = layout(&nodes, &edges, LayoutMode::Hierarchical, &params);
        let second = layout(&nodes, &edges, LayoutMode::Hierarchical, &params);
        assert_eq!(first, second);
        assert!(layout(&[], &[], LayoutMode::Radial, &params).is_empty());
    }
}
