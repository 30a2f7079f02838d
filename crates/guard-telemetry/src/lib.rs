//! # Guard Telemetry - Metrics and SIEM Delivery
//!
//! Observability glue for the egress guard: a process-wide Prometheus
//! registry with the pipeline's histograms and counters, and a bounded
//! SIEM event queue with a background drainer.
//!
//! Neither half is allowed to slow down or fail the guard path: metric
//! updates are lock-free or bucket-locked inside the prometheus crate, and
//! SIEM enqueueing returns backpressure (`false`) instead of blocking when
//! the queue is full.

pub mod metrics;
pub mod siem;

pub use metrics::{metrics, GuardMetrics};
pub use siem::{
    ConnectorType, SiemConfig, SiemConnector, SiemError, SiemEvent, SiemManager, TracingConnector,
};
