//! Attribution of events to sub-agents of multi-agent nodes.

use crate::core::types::{AgentActivity, AgentStatus, EventKind, TelemetryEvent};

/// Map `event` to an index into `roster`, or `None` when no agent matches.
///
/// First match wins, case-insensitive, roster order breaks ties:
/// 1. `agent_name` equals a role.
/// 2. `agent_name` contains a role, or a role contains `agent_name`.
/// 3. `message` mentions a role.
///
/// Unattributed events still count toward node-level status.
pub fn attribute(event: &TelemetryEvent, roster: &[String]) -> Option<usize> {
    let roles: Vec<String> = roster
        .iter()
        .map(|role| role.trim().to_lowercase())
        .collect();
    let candidates = || {
        roles
            .iter()
            .enumerate()
            .filter(|(_, role)| !role.is_empty())
    };

    if let Some(agent) = event
        .agent_name
        .as_deref()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
    {
        if let Some((index, _)) = candidates().find(|(_, role)| **role == agent) {
            return Some(index);
        }
        if let Some((index, _)) =
            candidates().find(|(_, role)| agent.contains(role.as_str()) || role.contains(&agent))
        {
            return Some(index);
        }
    }

    let message = event.message.as_deref()?.to_lowercase();
    candidates()
        .find(|(_, role)| message.contains(role.as_str()))
        .map(|(index, _)| index)
}

/// Rebuild per-agent activity for one node from its full event history.
///
/// Each agent's status comes from its most recent attributed event; ties go
/// to the higher-precedence source, then to terminal events, then to arrival
/// order. Nothing is carried over from earlier passes.
pub fn derive_agent_activity(
    node_id: &str,
    history: &[TelemetryEvent],
    roster: &[String],
) -> Vec<AgentActivity> {
    let attributed: Vec<(usize, usize, &TelemetryEvent)> = history
        .iter()
        .enumerate()
        .filter_map(|(arrival, event)| {
            attribute(event, roster).map(|agent| (agent, arrival, event))
        })
        .collect();

    roster
        .iter()
        .enumerate()
        .map(|(agent_index, role)| {
            let mut events: Vec<(usize, &TelemetryEvent)> = attributed
                .iter()
                .filter(|(agent, _, _)| *agent == agent_index)
                .map(|(_, arrival, event)| (*arrival, *event))
                .collect();
            events.sort_by_key(|(arrival, event)| recency_key(*arrival, event));

            let latest = events.last().map(|(_, event)| *event);
            AgentActivity {
                node_id: node_id.to_string(),
                agent_index,
                role: role.clone(),
                status: latest.map_or(AgentStatus::Idle, agent_status),
                last_thought: events
                    .iter()
                    .rev()
                    .find_map(|(_, event)| event.thought.clone()),
                last_tool: events.iter().rev().find_map(|(_, event)| event.tool.clone()),
            }
        })
        .collect()
}

fn recency_key(arrival: usize, event: &TelemetryEvent) -> (i64, u8, bool, usize) {
    let terminal = matches!(event.kind, EventKind::Completed | EventKind::Failed);
    (
        event.timestamp_ms,
        event.source.precedence(),
        terminal,
        arrival,
    )
}

fn agent_status(event: &TelemetryEvent) -> AgentStatus {
    match event.kind {
        EventKind::Completed => AgentStatus::Completed,
        EventKind::Failed => AgentStatus::Failed,
        EventKind::Queued => AgentStatus::Idle,
        _ if event.tool.is_some() => AgentStatus::UsingTool,
        EventKind::Started | EventKind::Progress | EventKind::Activity => AgentStatus::Thinking,
    }
}
