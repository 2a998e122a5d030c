//! Metrics hooks for lifecycle operations.
//!
//! The core only defines the trait; `cclife-prometheus` provides an exporter-backed implementation.
use std::{sync::Arc, time::Duration};

use crate::driver::Action;

/// How a recorded operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Cancelled,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Cancelled => "cancelled",
            Outcome::Timeout => "timeout",
        }
    }
}

pub trait MetricsBackend: Send + Sync + 'static {
    /// One controller dispatch finished.
    fn record_dispatch(&self, driver: &str, action: Action, outcome: Outcome, elapsed: Duration);

    /// The reaper tried to stop an idle container.
    fn record_eviction(&self, driver: &str, outcome: Outcome);

    /// A launch attempt finished.
    fn record_launch(&self, outcome: Outcome);
}

pub type MetricsHandle = Arc<dyn MetricsBackend>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsBackend for NoopMetrics {
    fn record_dispatch(&self, _: &str, _: Action, _: Outcome, _: Duration) {}
    fn record_eviction(&self, _: &str, _: Outcome) {}
    fn record_launch(&self, _: Outcome) {}
}

/// Metrics handle used when nothing else is configured.
pub fn noop() -> MetricsHandle {
    Arc::new(NoopMetrics)
}
