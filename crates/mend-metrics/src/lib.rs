//! # mend-metrics
//!
//! Observability for Mend plan runs.
//!
//! This crate provides:
//! - The [`TelemetrySink`] contract the orchestrator reports into
//! - [`MetricsCollector`], a bounded in-memory feed with global counters

mod collector;

pub use collector::{GlobalMetrics, MetricsCollector, TelemetryEvent, TelemetrySink};
