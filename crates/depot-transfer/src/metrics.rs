//! Per-location transport timing, emitted as structured tracing events.

use std::collections::HashMap;
use std::time::Instant;

use depot_cache::Location;
use depot_config::log_transfer_info;

pub trait TransportMetricConfig: Send + Sync {
    /// Metric name for the location, `None` to skip recording.
    fn metric_name(&self, location: &Location) -> Option<String>;
}

/// Records nothing.
pub struct NoTransportMetrics;

impl TransportMetricConfig for NoTransportMetrics {
    fn metric_name(&self, _location: &Location) -> Option<String> {
        None
    }
}

/// Metric names keyed by location name, with an optional fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticTransportMetrics {
    names: HashMap<String, String>,
    fallback: Option<String>,
}

impl StaticTransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, location: impl Into<String>, metric: impl Into<String>) -> Self {
        self.names.insert(location.into(), metric.into());
        self
    }

    pub fn with_fallback(mut self, metric: impl Into<String>) -> Self {
        self.fallback = Some(metric.into());
        self
    }
}

impl TransportMetricConfig for StaticTransportMetrics {
    fn metric_name(&self, location: &Location) -> Option<String> {
        self.names
            .get(location.name())
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}

/// Run `op` and log its duration under the location's metric name.
pub(crate) fn timed<T>(
    config: &dyn TransportMetricConfig,
    location: &Location,
    operation: &'static str,
    op: impl FnOnce() -> T,
) -> T {
    let Some(metric) = config.metric_name(location) else {
        return op();
    };
    let started = Instant::now();
    let result = op();
    log_transfer_info!(
        "Transport timing",
        metric = metric.as_str(),
        operation = operation,
        location = location.name(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    result
}
