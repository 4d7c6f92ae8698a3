//! Deterministic, pure logic for live execution state and graph geometry.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod attribution;
pub mod grouping;
pub mod invariants;
pub mod layout;
pub mod normalize;
pub mod projection;
pub mod reconcile;
pub mod types;
