//! Group bounding boxes, label pinning and drag snapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::Position;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Label offset relative to the group's anchor (first member) node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

/// A visual group of at least two nodes.
///
/// `bounding_box` is always derived from member positions; only
/// `label_anchor_offset` is free state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutGroup {
    pub id: String,
    pub member_node_ids: Vec<String>,
    #[serde(default)]
    pub bounding_box: Rect,
    #[serde(default)]
    pub label_anchor_offset: Offset,
}

impl LayoutGroup {
    pub fn anchor(&self) -> Option<&str> {
        self.member_node_ids.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupingParams {
    pub node_width: f64,
    pub node_height: f64,
    pub padding: f64,
    pub label_height: f64,
    /// Max distance (exclusive) at which a dragged node aligns to another node.
    pub snap_threshold: f64,
    /// Grid pitch; `0` disables grid snapping.
    pub grid_size: f64,
}

impl Default for GroupingParams {
    fn default() -> Self {
        Self {
            node_width: 200.0,
            node_height: 80.0,
            padding: 20.0,
            label_height: 24.0,
            snap_threshold: 8.0,
            grid_size: 20.0,
        }
    }
}

/// Members that still exist, deduplicated, in stored order.
fn live_members(members: &[String], positions: &BTreeMap<String, Position>) -> Vec<String> {
    let mut live: Vec<String> = Vec::with_capacity(members.len());
    for id in members {
        if positions.contains_key(id) && !live.contains(id) {
            live.push(id.clone());
        }
    }
    live
}

/// Tight box around the member nodes plus padding.
pub fn bounding_box(
    members: &[String],
    positions: &BTreeMap<String, Position>,
    params: &GroupingParams,
) -> Option<Rect> {
    let mut points = members.iter().filter_map(|id| positions.get(id));
    let first = points.next()?;
    let (mut min_x, mut min_y) = (first.x, first.y);
    let (mut max_x, mut max_y) = (first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Rect {
        x: min_x - params.padding,
        y: min_y - params.padding,
        width: max_x - min_x + params.node_width + 2.0 * params.padding,
        height: max_y - min_y + params.node_height + 2.0 * params.padding,
    })
}

/// Build a group with its label sitting just above the top-left of the box.
///
/// Returns `None` when fewer than two of `members` exist.
pub fn create_group(
    id: &str,
    members: &[String],
    positions: &BTreeMap<String, Position>,
    params: &GroupingParams,
) -> Option<LayoutGroup> {
    let members = live_members(members, positions);
    if members.len() < 2 {
        return None;
    }
    let bounding_box = bounding_box(&members, positions, params)?;
    let anchor = positions.get(&members[0])?;
    Some(LayoutGroup {
        id: id.to_string(),
        label_anchor_offset: Offset {
            dx: bounding_box.x - anchor.x,
            dy: bounding_box.y - params.label_height - anchor.y,
        },
        member_node_ids: members,
        bounding_box,
    })
}

/// Recompute the box from current positions. The label offset is kept as is,
/// so the label follows the anchor.
///
/// Members missing from `positions` are dropped; a group left with fewer than
/// two members is deleted (`None`).
pub fn recompute_group(
    group: &LayoutGroup,
    positions: &BTreeMap<String, Position>,
    params: &GroupingParams,
) -> Option<LayoutGroup> {
    let members = live_members(&group.member_node_ids, positions);
    if members.len() < 2 {
        return None;
    }
    Some(LayoutGroup {
        id: group.id.clone(),
        bounding_box: bounding_box(&members, positions, params)?,
        member_node_ids: members,
        label_anchor_offset: group.label_anchor_offset,
    })
}

/// Recompute every group, deleting the degenerate ones.
pub fn prune_groups(
    groups: &[LayoutGroup],
    positions: &BTreeMap<String, Position>,
    params: &GroupingParams,
) -> Vec<LayoutGroup> {
    groups
        .iter()
        .filter_map(|group| recompute_group(group, positions, params))
        .collect()
}

/// Absolute label position: the anchor's current position plus the offset.
pub fn label_position(
    group: &LayoutGroup,
    positions: &BTreeMap<String, Position>,
) -> Option<Position> {
    let anchor = positions.get(group.anchor()?)?;
    Some(anchor.offset(group.label_anchor_offset.dx, group.label_anchor_offset.dy))
}

/// Record a user drag of the label to `label_at`, stored relative to the anchor.
pub fn move_label(
    group: &LayoutGroup,
    label_at: Position,
    positions: &BTreeMap<String, Position>,
) -> LayoutGroup {
    let mut moved = group.clone();
    if let Some(anchor) = group.anchor().and_then(|id| positions.get(id)) {
        moved.label_anchor_offset = Offset {
            dx: label_at.x - anchor.x,
            dy: label_at.y - anchor.y,
        };
    }
    moved
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

/// Alignment hint shown while dragging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapGuide {
    pub axis: Axis,
    pub coordinate: f64,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snap {
    pub position: Position,
    pub guides: Vec<SnapGuide>,
}

/// Snap a dragged node.
///
/// Each axis aligns to the nearest other node within `snap_threshold`
/// (ties go to the first node in id order) and emits a guide. Grid snapping
/// applies only when no guide fired, so it never overrides node alignment.
pub fn snap(
    node_id: &str,
    proposed: Position,
    others: &BTreeMap<String, Position>,
    params: &GroupingParams,
) -> Snap {
    let mut best_x: Option<(f64, &str, f64)> = None;
    let mut best_y: Option<(f64, &str, f64)> = None;

    for (id, other) in others {
        if id == node_id {
            continue;
        }
        let dx = (proposed.x - other.x).abs();
        if dx < params.snap_threshold && best_x.is_none_or(|(best, _, _)| dx < best) {
            best_x = Some((dx, id.as_str(), other.x));
        }
        let dy = (proposed.y - other.y).abs();
        if dy < params.snap_threshold && best_y.is_none_or(|(best, _, _)| dy < best) {
            best_y = Some((dy, id.as_str(), other.y));
        }
    }

    let mut position = proposed;
    let mut guides = Vec::new();
    if let Some((_, id, x)) = best_x {
        position.x = x;
        guides.push(SnapGuide {
            axis: Axis::X,
            coordinate: x,
            node_id: id.to_string(),
        });
    }
    if let Some((_, id, y)) = best_y {
        position.y = y;
        guides.push(SnapGuide {
            axis: Axis::Y,
            coordinate: y,
            node_id: id.to_string(),
        });
    }

    if guides.is_empty() && params.grid_size > 0.0 {
        position = Position::new(
            (position.x / params.grid_size).round() * params.grid_size,
            (position.y / params.grid_size).round() * params.grid_size,
        );
    }

    Snap { position, guides }
}
