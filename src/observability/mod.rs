//! Observability for the router
//!
//! Structured logging goes through `tracing` at the call sites; this module
//! holds the routing counters.

pub mod metrics;

pub use metrics::{Counter, MetricsSnapshot, RouterMetrics};
