//! Test-only helpers: event and graph builders plus a scripted transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::StreamExt;
use futures::stream;
use serde_json::Value;

use crate::core::types::{EventKind, EventScope, Source, TelemetryEvent};
use crate::graph::{GraphEdge, GraphNode, Position, WorkflowGraph};
use crate::io::transport::{ChannelError, EventStream, Transport};

/// Create a push event with no execution id and no optional fields.
pub fn event(node_id: &str, event_type: &str, timestamp_ms: i64) -> TelemetryEvent {
    event_from(Source::Push, node_id, event_type, timestamp_ms)
}

/// Create an event from an explicit source.
pub fn event_from(
    source: Source,
    node_id: &str,
    event_type: &str,
    timestamp_ms: i64,
) -> TelemetryEvent {
    TelemetryEvent {
        event_type: event_type.to_string(),
        kind: EventKind::from_event_type(event_type),
        scope: EventScope::from_event_type(event_type),
        node_id: node_id.to_string(),
        execution_id: None,
        agent_name: None,
        task_name: None,
        progress: None,
        message: None,
        thought: None,
        tool: None,
        timestamp_ms,
        tokens: None,
        cost: None,
        source,
    }
}

pub fn roster(roles: &[&str]) -> Vec<String> {
    roles.iter().map(|role| role.to_string()).collect()
}

/// Create a single-agent node at the origin.
pub fn node(id: &str) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind: "agent".to_string(),
        position: Position::default(),
        agent_count: 1,
        agents: Vec::new(),
    }
}

/// Create a multi-agent node with the given roster.
pub fn agent_node(id: &str, roles: &[&str]) -> GraphNode {
    GraphNode {
        kind: "crew".to_string(),
        agent_count: roles.len() as u32,
        agents: roster(roles),
        ..node(id)
    }
}

pub fn edge(id: &str, source: &str, target: &str) -> GraphEdge {
    GraphEdge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
    }
}

pub fn graph(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> WorkflowGraph {
    WorkflowGraph {
        nodes,
        edges,
        groups: Vec::new(),
    }
}

/// One scripted answer to `open_stream`.
#[derive(Debug, Clone)]
pub enum ScriptedStream {
    /// Connection refused.
    Refuse,
    /// Yield the records, then close the stream.
    Close(Vec<Value>),
    /// Yield the records, then stay open until dropped.
    Hold(Vec<Value>),
    /// Yield each item, errors included, then stay open until dropped.
    Items(Vec<Result<Value, ChannelError>>),
}

/// Transport whose stream openings and poll responses are queued ahead of time.
///
/// An exhausted stream queue refuses connections; an exhausted poll queue
/// fails polls. Call counts are observable.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    streams: Mutex<VecDeque<ScriptedStream>>,
    polls: Mutex<VecDeque<Result<Value, ChannelError>>>,
    opened: Mutex<Vec<String>>,
    poll_count: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(streams: Vec<ScriptedStream>, polls: Vec<Value>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            polls: Mutex::new(polls.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// Execution ids passed to `open_stream`, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stream_attempts(&self) -> usize {
        self.opened().len()
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    async fn open_stream(&self, execution_id: &str) -> Result<EventStream, ChannelError> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(execution_id.to_string());
        let next = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(ScriptedStream::Refuse);
        match next {
            ScriptedStream::Refuse => Err(ChannelError::Connect {
                url: format!("scripted://{}", execution_id),
                reason: "connection refused".to_string(),
            }),
            ScriptedStream::Close(records) => Ok(stream::iter(records.into_iter().map(Ok)).boxed()),
            ScriptedStream::Hold(records) => Ok(stream::iter(records.into_iter().map(Ok))
                .chain(stream::pending::<Result<Value, ChannelError>>())
                .boxed()),
            ScriptedStream::Items(items) => Ok(stream::iter(items)
                .chain(stream::pending::<Result<Value, ChannelError>>())
                .boxed()),
        }
    }

    async fn fetch_status(&self, _execution_id: &str) -> Result<Value, ChannelError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(ChannelError::Poll("no scripted response".to_string())))
    }
}
