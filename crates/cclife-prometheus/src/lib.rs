//! Prometheus metrics backend for the chaincode lifecycle.
//!
//! [`PrometheusMetrics`] implements [`cclife_core::MetricsBackend`] on its own [`Registry`].
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use cclife_core::{Controller, DriverRouter};
//! use cclife_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let controller = Controller::new(DriverRouter::new()).with_metrics(Arc::new(metrics.clone()));
//!
//! // Serve this from your own `/metrics` endpoint.
//! let text = metrics.encode_text()?;
//! # let _ = (controller, text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `cclife_dispatch_total{driver, action, outcome}` - Counter
//! - `cclife_dispatch_duration_seconds{driver, action}` - Histogram
//! - `cclife_evictions_total{driver, outcome}` - Counter
//! - `cclife_launches_total{outcome}` - Counter
//!
//! No HTTP server is included.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
