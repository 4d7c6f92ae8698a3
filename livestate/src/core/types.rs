//! Shared deterministic types for the live-state core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime status of a node within one execution.
///
/// Ordered by progress through the state machine:
/// `idle → pending → running → {completed | failed}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    /// Position in the state machine. Terminal states share the highest rank.
    pub fn rank(self) -> u8 {
        match self {
            NodeStatus::Idle => 0,
            NodeStatus::Pending => 1,
            NodeStatus::Running => 2,
            NodeStatus::Completed | NodeStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        }
    }

    /// Parse a status string as reported by the poll endpoint.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(NodeStatus::Idle),
            "pending" | "queued" => Some(NodeStatus::Pending),
            "running" | "in_progress" => Some(NodeStatus::Running),
            "completed" | "complete" | "succeeded" | "success" => Some(NodeStatus::Completed),
            "failed" | "error" => Some(NodeStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Live streaming connection.
    Push,
    /// Periodic status polling.
    Pull,
    /// Historical execution trace.
    Trace,
}

impl Source {
    /// Higher wins: push > pull > trace.
    pub fn precedence(self) -> u8 {
        match self {
            Source::Push => 3,
            Source::Pull => 2,
            Source::Trace => 1,
        }
    }
}

/// What an event says happened, derived from the `*_suffix` of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    /// Thoughts, tool calls and anything else that carries no status.
    Activity,
}

impl EventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        let lowered = event_type.to_ascii_lowercase();
        let suffix = lowered.rsplit('_').next().unwrap_or(lowered.as_str());
        match suffix {
            "pending" | "queued" => EventKind::Queued,
            "started" | "start" => EventKind::Started,
            "progress" => EventKind::Progress,
            "completed" | "complete" | "finished" => EventKind::Completed,
            "failed" | "error" => EventKind::Failed,
            _ => EventKind::Activity,
        }
    }
}

/// Whether an event speaks for the whole node or for one of its sub-agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Node,
    Agent,
}

impl EventScope {
    pub fn from_event_type(event_type: &str) -> Self {
        let lowered = event_type.to_ascii_lowercase();
        if ["agent_", "task_", "tool_"]
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
        {
            EventScope::Agent
        } else {
            EventScope::Node
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// Canonical, immutable telemetry record produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: String,
    pub kind: EventKind,
    pub scope: EventScope,
    pub node_id: String,
    pub execution_id: Option<String>,
    pub agent_name: Option<String>,
    pub task_name: Option<String>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub thought: Option<String>,
    pub tool: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub tokens: Option<TokenUsage>,
    pub cost: Option<f64>,
    pub source: Source,
}

impl TelemetryEvent {
    /// Identity used for dedup. Excludes the source: the same occurrence
    /// reported by push and trace collapses to one.
    pub fn key(&self) -> EventKey {
        EventKey {
            node_id: self.node_id.clone(),
            event_type: self.event_type.clone(),
            agent_name: self.agent_name.clone(),
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Node status this event asks for, if any.
    pub fn target_status(&self) -> Option<NodeStatus> {
        match (self.kind, self.scope) {
            (EventKind::Queued, _) => Some(NodeStatus::Pending),
            (EventKind::Started | EventKind::Progress, _) => Some(NodeStatus::Running),
            (EventKind::Completed, EventScope::Node) => Some(NodeStatus::Completed),
            (EventKind::Failed, EventScope::Node) => Some(NodeStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub node_id: String,
    pub event_type: String,
    pub agent_name: Option<String>,
    pub timestamp_ms: i64,
}

/// Authoritative per-node state for one execution id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRuntimeState {
    pub node_id: String,
    pub status: NodeStatus,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub last_event_timestamp: i64,
    pub source_of_truth: Source,
    pub message: Option<String>,
    pub tokens: TokenUsage,
    pub cost: f64,
}

impl NodeRuntimeState {
    pub fn idle(node_id: &str, source: Source) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeStatus::Idle,
            progress: 0.0,
            last_event_timestamp: i64::MIN,
            source_of_truth: source,
            message: None,
            tokens: TokenUsage::default(),
            cost: 0.0,
        }
    }
}

/// Visual classification of an edge, derived from its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeClass {
    Idle,
    Pending,
    Flowing,
    Active,
    Completed,
}

/// Derived per-agent status within a multi-agent node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    UsingTool,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentActivity {
    pub node_id: String,
    pub agent_index: usize,
    pub role: String,
    pub status: AgentStatus,
    pub last_thought: Option<String>,
    pub last_tool: Option<String>,
}
