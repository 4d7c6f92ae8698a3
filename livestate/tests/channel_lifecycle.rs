//! Channel lifecycle tests against a scripted transport.
//!
//! Time is paused, so backoff and poll timers advance instantly and
//! deterministically whenever every task is idle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use livestate::channel::{ChannelConfig, ChannelPhase, TelemetryChannel};
use livestate::core::types::{NodeStatus, Source, TelemetryEvent};
use livestate::io::transport::ChannelError;
use livestate::test_support::{ScriptedStream, ScriptedTransport};

fn started(node_id: &str) -> Value {
    json!({"event_type": "node_started", "node_id": node_id, "timestamp": "2024-05-01T12:00:00Z"})
}

fn recorder(channel: &TelemetryChannel<ScriptedTransport>) -> Arc<Mutex<Vec<TelemetryEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = channel.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

fn counter(channel: &TelemetryChannel<ScriptedTransport>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let _subscription = channel.subscribe(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// Five consecutive failures switch to polling; no live retry happens after that.
#[tokio::test(start_paused = true)]
async fn falls_back_to_polling_after_five_failures() {
    let transport = Arc::new(ScriptedTransport::new(
        Vec::new(),
        vec![
            json!({"status": "running", "node_id": "a", "progress": 0.5}),
            json!({"status": "completed", "nodes": {"a": "completed"}}),
        ],
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let events = recorder(&channel);

    let begin = tokio::time::Instant::now();
    let mut handle = channel.connect("exec-1");
    assert_eq!(handle.finished().await, Some(NodeStatus::Completed));

    // Backoff 1s + 2s + 3s + 4s, first poll immediately, second after 500ms.
    let elapsed = begin.elapsed();
    assert!(elapsed >= Duration::from_millis(10_500), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(11), "elapsed {:?}", elapsed);
    assert_eq!(transport.stream_attempts(), 5);
    assert_eq!(transport.poll_count(), 2);

    let events = events.lock().unwrap().clone();
    let seen: Vec<(&str, &str)> = events
        .iter()
        .map(|e| (e.node_id.as_str(), e.event_type.as_str()))
        .collect();
    assert_eq!(seen, vec![("a", "node_progress"), ("a", "node_completed")]);
    assert!(events.iter().all(|e| e.source == Source::Pull));
    assert!(events.iter().all(|e| e.execution_id.as_deref() == Some("exec-1")));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.stream_attempts(), 5);
    assert_eq!(transport.poll_count(), 2);
}

/// Failed polls keep polling until a terminal snapshot arrives.
#[tokio::test(start_paused = true)]
async fn polling_survives_failed_polls() {
    let config = ChannelConfig {
        max_attempts: 1,
        ..ChannelConfig::default()
    };
    let transport = Arc::new(ScriptedTransport::new(Vec::new(), Vec::new()));
    let mut channel = TelemetryChannel::with_shared_transport(Arc::clone(&transport), config);
    let mut handle = channel.connect("exec-1");

    assert_eq!(
        handle.wait_for(|phase| *phase == ChannelPhase::Polling).await,
        Some(ChannelPhase::Polling)
    );
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    assert_eq!(transport.stream_attempts(), 1);
    assert!(transport.poll_count() >= 3);
    assert_eq!(handle.phase(), ChannelPhase::Polling);
}

#[tokio::test(start_paused = true)]
async fn live_stream_delivers_normalized_events_until_execution_ends() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![ScriptedStream::Close(vec![
            started("a"),
            json!({"node_id": "a"}),
            json!({"event_type": "execution_completed", "execution_id": "exec-1"}),
            started("b"),
        ])],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let events = recorder(&channel);

    let mut handle = channel.connect("exec-1");
    assert_eq!(handle.finished().await, Some(NodeStatus::Completed));

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].node_id, "a");
    assert_eq!(events[0].source, Source::Push);
    assert_eq!(transport.stream_attempts(), 1);
    assert_eq!(transport.poll_count(), 0);
}

/// A successful open resets the failure count, so later drops retry again.
#[tokio::test(start_paused = true)]
async fn successful_open_resets_failure_count() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![
            ScriptedStream::Refuse,
            ScriptedStream::Refuse,
            ScriptedStream::Close(vec![started("a")]),
            ScriptedStream::Refuse,
            ScriptedStream::Refuse,
            ScriptedStream::Refuse,
            ScriptedStream::Close(vec![json!({"event_type": "workflow_failed"})]),
        ],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let count = counter(&channel);

    let mut handle = channel.connect("exec-1");
    assert_eq!(handle.finished().await, Some(NodeStatus::Failed));
    assert_eq!(transport.stream_attempts(), 7);
    assert_eq!(transport.poll_count(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Disconnect cancels the pending backoff timer synchronously.
#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_backoff() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new(), Vec::new()));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());

    let mut handle = channel.connect("exec-1");
    assert_eq!(
        handle
            .wait_for(|phase| matches!(phase, ChannelPhase::Backoff { .. }))
            .await,
        Some(ChannelPhase::Backoff { attempt: 1 })
    );

    channel.disconnect();
    channel.disconnect();
    assert_eq!(handle.phase(), ChannelPhase::Idle);
    assert_eq!(channel.execution_id(), None);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.stream_attempts(), 1);
    assert_eq!(transport.poll_count(), 0);
    assert_eq!(handle.finished().await, None);
}

/// Handlers are cleared on disconnect and never see the next execution's events.
#[tokio::test(start_paused = true)]
async fn disconnect_clears_handlers() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![
            ScriptedStream::Hold(vec![started("a")]),
            ScriptedStream::Hold(vec![started("b")]),
        ],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let first = counter(&channel);

    let _handle = channel.connect("exec-1");
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(first.load(Ordering::SeqCst), 1);

    channel.disconnect();
    let second = counter(&channel);
    let mut handle = channel.connect("exec-2");
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(handle.phase(), ChannelPhase::Live);
    assert_eq!(transport.opened(), vec!["exec-1".to_string(), "exec-2".to_string()]);
    assert_eq!(
        handle.wait_for(|phase| *phase == ChannelPhase::Live).await,
        Some(ChannelPhase::Live)
    );
}

/// Connecting to a new execution id tears down the previous connection first.
#[tokio::test(start_paused = true)]
async fn connect_to_new_execution_implicitly_disconnects() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![
            ScriptedStream::Hold(Vec::new()),
            ScriptedStream::Hold(vec![started("b")]),
        ],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let stale = counter(&channel);

    let mut old = channel.connect("exec-1");
    assert_eq!(
        old.wait_for(|phase| *phase == ChannelPhase::Live).await,
        Some(ChannelPhase::Live)
    );

    let mut new = channel.connect("exec-2");
    let fresh = counter(&channel);
    assert_eq!(old.phase(), ChannelPhase::Idle);
    assert_eq!(channel.execution_id(), Some("exec-2"));
    assert_eq!(new.execution_id(), "exec-2");

    assert_eq!(
        new.wait_for(|phase| *phase == ChannelPhase::Live).await,
        Some(ChannelPhase::Live)
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(stale.load(Ordering::SeqCst), 0);
    assert_eq!(fresh.load(Ordering::SeqCst), 1);
}

fn delivered(events: &Arc<Mutex<Vec<TelemetryEvent>>>) -> Vec<String> {
    events.lock().unwrap().iter().map(|e| e.node_id.clone()).collect()
}

/// An undecodable record is dropped; the stream stays open and later records arrive.
#[tokio::test(start_paused = true)]
async fn undecodable_record_keeps_stream_open() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![ScriptedStream::Items(vec![
            Ok(started("a")),
            Err(ChannelError::Decode("expected value at line 1 column 1: {oops".to_string())),
            Ok(started("b")),
        ])],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let events = recorder(&channel);

    let handle = channel.connect("exec-1");
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(delivered(&events), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(transport.stream_attempts(), 1);
    assert_eq!(handle.phase(), ChannelPhase::Live);
}

/// A transport error mid-stream drops the connection and reconnects after backoff.
#[tokio::test(start_paused = true)]
async fn transport_error_reconnects() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![
            ScriptedStream::Items(vec![
                Ok(started("a")),
                Err(ChannelError::Stream("connection reset".to_string())),
                Ok(started("lost")),
            ]),
            ScriptedStream::Hold(vec![started("b")]),
        ],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let events = recorder(&channel);

    let mut handle = channel.connect("exec-1");
    assert_eq!(
        handle
            .wait_for(|phase| matches!(phase, ChannelPhase::Backoff { .. }))
            .await,
        Some(ChannelPhase::Backoff { attempt: 1 })
    );
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(delivered(&events), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(transport.stream_attempts(), 2);
    assert_eq!(handle.phase(), ChannelPhase::Live);
}

/// Untimestamped records arriving together still get distinct, increasing timestamps.
#[tokio::test(start_paused = true)]
async fn untimestamped_records_get_increasing_timestamps() {
    let progress =
        |value: f64| json!({"event_type": "node_progress", "node_id": "a", "progress": value});
    let transport = Arc::new(ScriptedTransport::new(
        vec![ScriptedStream::Hold(vec![progress(0.2), progress(0.5), progress(0.7)])],
        Vec::new(),
    ));
    let mut channel =
        TelemetryChannel::with_shared_transport(Arc::clone(&transport), ChannelConfig::default());
    let events = recorder(&channel);

    let _handle = channel.connect("exec-1");
    tokio::time::sleep(Duration::from_millis(1)).await;

    let stamps: Vec<i64> = events.lock().unwrap().iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]), "stamps {:?}", stamps);
}
