//! Observability for helmsman
//!
//! Per OBSERVABILITY.md:
//! - Structured JSON logs, one line per event
//! - Counter metrics, exact values, reset only on process start
//! - Observability is passive: it never influences routing or bootstrap

pub mod logger;
pub mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
