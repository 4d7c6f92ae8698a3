//! Live telemetry channel for one execution at a time.
//!
//! A channel owns one background task per connection. The task streams push
//! records, reconnects with linear backoff (`attempt * base_delay`) and, once
//! `max_attempts` consecutive attempts have failed, falls back to polling the
//! execution status until it reaches a terminal status. Every raw record is
//! normalized before it reaches a subscribed handler.
//!
//! `disconnect` aborts the task, which cancels any pending backoff or poll
//! timer, and clears the handler set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::normalize::{
    ReceiptClock, execution_outcome, normalize, poll_snapshot_events, snapshot_status,
};
use crate::core::types::{NodeStatus, Source, TelemetryEvent};
use crate::io::transport::{ChannelError, EventStream, Transport};

/// Retry and polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub base_delay: Duration,
    /// Consecutive failed live attempts before falling back to polling.
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl ChannelConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Connection lifecycle, observable through [`ChannelHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Not connected.
    Idle,
    Connecting,
    /// Live stream open.
    Live,
    /// Waiting `attempt * base_delay` before the next live attempt.
    Backoff { attempt: u32 },
    /// Live attempts exhausted; polling execution status.
    Polling,
    /// Execution reached a terminal status; nothing more will arrive.
    Finished(NodeStatus),
}

/// Observer for one connection's phase.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    execution_id: String,
    phase: watch::Receiver<ChannelPhase>,
}

impl ChannelHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn phase(&self) -> ChannelPhase {
        *self.phase.borrow()
    }

    /// Wait until the phase satisfies `ready`. Returns `None` once the
    /// connection is gone without ever satisfying it.
    pub async fn wait_for(
        &mut self,
        ready: impl FnMut(&ChannelPhase) -> bool,
    ) -> Option<ChannelPhase> {
        self.phase.wait_for(ready).await.ok().map(|phase| *phase)
    }

    /// Wait for the terminal status of the execution.
    pub async fn finished(&mut self) -> Option<NodeStatus> {
        match self
            .wait_for(|phase| matches!(phase, ChannelPhase::Finished(_)))
            .await
        {
            Some(ChannelPhase::Finished(status)) => Some(status),
            _ => None,
        }
    }
}

type Handler = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: BTreeMap<u64, Handler>,
}

/// State shared between the channel and its connection task.
#[derive(Default)]
struct Shared {
    handlers: Mutex<Handlers>,
    /// Bumped on every disconnect; a task only dispatches while its
    /// generation is current.
    generation: AtomicU64,
}

impl Shared {
    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke every handler with `event`. Returns false when `generation` is
    /// stale, in which case nothing is invoked.
    fn dispatch(&self, generation: u64, event: &TelemetryEvent) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let handlers: Vec<Handler> = self.handlers().entries.values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
        true
    }
}

/// Returned by [`TelemetryChannel::subscribe`].
#[must_use = "dropping a Subscription keeps the handler registered"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the handler. A no-op after `disconnect` already cleared it.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handlers().entries.remove(&self.id);
        }
    }
}

/// Live telemetry for one execution id at a time.
pub struct TelemetryChannel<T: Transport> {
    transport: Arc<T>,
    config: ChannelConfig,
    shared: Arc<Shared>,
    execution_id: Option<String>,
    phase: Option<watch::Sender<ChannelPhase>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Transport> TelemetryChannel<T> {
    pub fn new(transport: T, config: ChannelConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    pub fn with_shared_transport(transport: Arc<T>, config: ChannelConfig) -> Self {
        Self {
            transport,
            config,
            shared: Arc::default(),
            execution_id: None,
            phase: None,
            task: None,
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    /// Start streaming `execution_id`.
    ///
    /// If a connection is already active it is torn down first, exactly like
    /// [`disconnect`](Self::disconnect), including clearing handlers; handlers
    /// subscribed while idle are kept. Must be called within a tokio runtime.
    pub fn connect(&mut self, execution_id: &str) -> ChannelHandle {
        if self.execution_id.is_some() {
            self.disconnect();
        }
        info!(%execution_id, "connecting telemetry channel");

        let (phase_tx, phase_rx) = watch::channel(ChannelPhase::Connecting);
        let connection = Connection {
            transport: Arc::clone(&self.transport),
            config: self.config,
            shared: Arc::clone(&self.shared),
            generation: self.shared.generation.load(Ordering::SeqCst),
            execution_id: execution_id.to_string(),
            phase: phase_tx.clone(),
            clock: ReceiptClock::default(),
        };
        self.task = Some(tokio::spawn(connection.run()));
        self.phase = Some(phase_tx);
        self.execution_id = Some(execution_id.to_string());

        ChannelHandle {
            execution_id: execution_id.to_string(),
            phase: phase_rx,
        }
    }

    /// Register a handler for every normalized event.
    pub fn subscribe(
        &self,
        handler: impl Fn(&TelemetryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut handlers = self.shared.handlers();
        let id = handlers.next_id;
        handlers.next_id += 1;
        handlers.entries.insert(id, Arc::new(handler));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Close the connection, cancel pending timers and clear all handlers.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.handlers().entries.clear();
        if let Some(phase) = self.phase.take() {
            phase.send_replace(ChannelPhase::Idle);
        }
        if let Some(execution_id) = self.execution_id.take() {
            info!(%execution_id, "telemetry channel disconnected");
        }
    }
}

impl<T: Transport> Drop for TelemetryChannel<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Everything one connection task owns.
struct Connection<T> {
    transport: Arc<T>,
    config: ChannelConfig,
    shared: Arc<Shared>,
    generation: u64,
    execution_id: String,
    phase: watch::Sender<ChannelPhase>,
    clock: ReceiptClock,
}

/// Why a live stream stopped.
enum StreamEnd {
    Finished(NodeStatus),
    Dropped,
    Superseded,
}

impl<T: Transport> Connection<T> {
    async fn run(self) {
        let mut failures = 0u32;
        loop {
            self.phase.send_replace(ChannelPhase::Connecting);
            match self.transport.open_stream(&self.execution_id).await {
                Ok(stream) => {
                    failures = 0;
                    self.phase.send_replace(ChannelPhase::Live);
                    debug!(execution_id = %self.execution_id, "live stream open");
                    match self.pump(stream).await {
                        StreamEnd::Finished(status) => {
                            self.finish(status);
                            return;
                        }
                        StreamEnd::Superseded => return,
                        StreamEnd::Dropped => {}
                    }
                }
                Err(err) => {
                    warn!(
                        execution_id = %self.execution_id,
                        error = %err,
                        "live connection failed"
                    );
                }
            }

            failures += 1;
            if failures >= self.config.max_attempts {
                break;
            }
            self.phase
                .send_replace(ChannelPhase::Backoff { attempt: failures });
            let delay = self.config.backoff(failures);
            debug!(
                execution_id = %self.execution_id,
                attempt = failures,
                ?delay,
                "reconnecting after backoff"
            );
            tokio::time::sleep(delay).await;
        }

        warn!(
            execution_id = %self.execution_id,
            attempts = failures,
            "live attempts exhausted, falling back to polling"
        );
        self.poll().await;
    }

    async fn pump(&self, mut stream: EventStream) -> StreamEnd {
        while let Some(item) = stream.next().await {
            match item {
                Ok(raw) => {
                    if let Some(status) = execution_outcome(&raw) {
                        return StreamEnd::Finished(status);
                    }
                    if !self.deliver(&raw, Source::Push) {
                        return StreamEnd::Superseded;
                    }
                }
                Err(ChannelError::Decode(reason)) => {
                    warn!(
                        execution_id = %self.execution_id,
                        %reason,
                        "dropping undecodable record"
                    );
                }
                Err(err) => {
                    warn!(execution_id = %self.execution_id, error = %err, "live stream error");
                    return StreamEnd::Dropped;
                }
            }
        }
        debug!(execution_id = %self.execution_id, "live stream closed by server");
        StreamEnd::Dropped
    }

    async fn poll(&self) {
        self.phase.send_replace(ChannelPhase::Polling);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = match self.transport.fetch_status(&self.execution_id).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(execution_id = %self.execution_id, error = %err, "status poll failed");
                    continue;
                }
            };
            for event in poll_snapshot_events(&snapshot, &self.execution_id, self.clock.next()) {
                if !self.shared.dispatch(self.generation, &event) {
                    return;
                }
            }
            if let Some(status) = snapshot_status(&snapshot).filter(|status| status.is_terminal()) {
                self.finish(status);
                return;
            }
        }
    }

    /// Normalize and dispatch one raw record. Returns false once superseded.
    fn deliver(&self, raw: &Value, source: Source) -> bool {
        match normalize(raw, source, self.clock.next()) {
            Some(event) => self.shared.dispatch(self.generation, &event),
            None => true,
        }
    }

    fn finish(&self, status: NodeStatus) {
        info!(execution_id = %self.execution_id, %status, "execution finished");
        self.phase.send_replace(ChannelPhase::Finished(status));
    }
}
