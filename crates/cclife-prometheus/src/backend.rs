use std::time::Duration;

use cclife_core::{Action, MetricsBackend, Outcome};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder, proto::MetricFamily,
};

/// Buckets for lifecycle operations: container starts take seconds, stops of idle processes milliseconds.
const DISPATCH_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    dispatch_total: CounterVec,
    dispatch_duration: HistogramVec,
    evictions_total: CounterVec,
    launches_total: CounterVec,
}

impl PrometheusMetrics {
    /// Create the metrics on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the metrics on `registry`. Fails when they are already registered there.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let dispatch_total = CounterVec::new(
            Opts::new("cclife_dispatch_total", "Lifecycle operations dispatched to drivers"),
            &["driver", "action", "outcome"],
        )?;
        registry.register(Box::new(dispatch_total.clone()))?;

        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "cclife_dispatch_duration_seconds",
                "Time spent in lifecycle operations, lock wait included",
            )
            .buckets(DISPATCH_BUCKETS.to_vec()),
            &["driver", "action"],
        )?;
        registry.register(Box::new(dispatch_duration.clone()))?;

        let evictions_total = CounterVec::new(
            Opts::new("cclife_evictions_total", "Idle containers stopped by the reaper"),
            &["driver", "outcome"],
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let launches_total = CounterVec::new(
            Opts::new("cclife_launches_total", "Chaincode launch attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(launches_total.clone()))?;

        Ok(Self {
            registry,
            dispatch_total,
            dispatch_duration,
            evictions_total,
            launches_total,
        })
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// All metrics in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_dispatch(&self, driver: &str, action: Action, outcome: Outcome, elapsed: Duration) {
        self.dispatch_total
            .with_label_values(&[driver, action.as_str(), outcome.as_str()])
            .inc();
        self.dispatch_duration
            .with_label_values(&[driver, action.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn record_eviction(&self, driver: &str, outcome: Outcome) {
        self.evictions_total
            .with_label_values(&[driver, outcome.as_str()])
            .inc();
    }

    fn record_launch(&self, outcome: Outcome) {
        self.launches_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }
}
