//! Modelcast Telemetry
//!
//! Counters for the publish and load paths. Every recorded event updates an
//! in-process atomic (so tests and health endpoints can read a snapshot)
//! and is forwarded to the `metrics` facade for whatever exporter the
//! binary installs.

pub mod metrics;

pub use crate::metrics::{describe_metrics, MetricsSnapshot, ProtocolMetrics};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{MetricsSnapshot, ProtocolMetrics};
}
