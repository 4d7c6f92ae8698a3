//! Live execution state and graph geometry for a visual pipeline editor.
//!
//! This crate reconciles telemetry about a running workflow into per-node
//! runtime state and computes canvas geometry for the workflow graph. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (normalization, reconciliation,
//!   attribution, projection, layout, grouping). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (HTTP/SSE transport, trace files,
//!   graph documents, config). Isolated behind traits to enable scripting in
//!   tests.
//!
//! [`channel`] drives a transport on a tokio task and [`view`] ties channel
//! output, the reconciler and the projector into render frames.

pub mod channel;
pub mod core;
pub mod graph;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod view;
