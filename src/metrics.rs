//! Resolve metrics collection
//!
//! When metrics are disabled a no-op collector is bound instead, so the
//! resolve path never branches on the setting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::error::Error;

/// Sink for resolve outcomes
pub(crate) trait MetricsCollector: Send + Sync {
    fn record_resolve(&self, success: bool, latency: Duration);
    fn record_error(&self, err: &Error);
    fn stats(&self) -> MetricsStats;
    fn reset(&self);
}

/// Select the collector implementation for the configuration
pub(crate) fn collector(enabled: bool) -> Arc<dyn MetricsCollector> {
    if enabled {
        Arc::new(Metrics::default())
    } else {
        Arc::new(NoOpMetrics)
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_resolves: u64,
    success_resolves: u64,
    failed_resolves: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,
    network_errors: u64,
    parse_errors: u64,
}

/// Lock-guarded metrics collector
#[derive(Debug, Default)]
struct Metrics {
    inner: Mutex<MetricsInner>,
}

impl MetricsCollector for Metrics {
    fn record_resolve(&self, success: bool, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_resolves += 1;
        inner.total_latency += latency;
        if success {
            inner.success_resolves += 1;
        } else {
            inner.failed_resolves += 1;
        }

        inner.min_latency = Some(match inner.min_latency {
            Some(min) => min.min(latency),
            None => latency,
        });
        inner.max_latency = inner.max_latency.max(latency);
    }

    fn record_error(&self, err: &Error) {
        let mut inner = self.inner.lock().unwrap();
        if err.is_network_error() {
            inner.network_errors += 1;
        } else if matches!(err, Error::ParseFailed(_)) {
            inner.parse_errors += 1;
        }
    }

    fn stats(&self) -> MetricsStats {
        let inner = self.inner.lock().unwrap();
        let success_rate = if inner.total_resolves > 0 {
            inner.success_resolves as f64 / inner.total_resolves as f64
        } else {
            0.0
        };
        let avg_latency = if inner.total_resolves > 0 {
            inner.total_latency / inner.total_resolves as u32
        } else {
            Duration::ZERO
        };

        MetricsStats {
            total_resolves: inner.total_resolves,
            success_resolves: inner.success_resolves,
            failed_resolves: inner.failed_resolves,
            success_rate,
            avg_latency,
            min_latency: inner.min_latency.unwrap_or(Duration::ZERO),
            max_latency: inner.max_latency,
            network_errors: inner.network_errors,
            parse_errors: inner.parse_errors,
        }
    }

    fn reset(&self) {
        *self.inner.lock().unwrap() = MetricsInner::default();
    }
}

/// Collector bound when metrics are disabled
struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn record_resolve(&self, _success: bool, _latency: Duration) {}
    fn record_error(&self, _err: &Error) {}
    fn stats(&self) -> MetricsStats {
        MetricsStats::default()
    }
    fn reset(&self) {}
}

/// Snapshot of resolve metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsStats {
    /// Total resolve operations
    pub total_resolves: u64,
    /// Resolves that returned a result
    pub success_resolves: u64,
    /// Resolves that surfaced an error
    pub failed_resolves: u64,
    /// `success_resolves / total_resolves`, 0 when nothing was recorded
    pub success_rate: f64,
    /// Mean resolve latency
    pub avg_latency: Duration,
    /// Fastest resolve
    pub min_latency: Duration,
    /// Slowest resolve
    pub max_latency: Duration,
    /// Errors classified as network failures
    pub network_errors: u64,
    /// Errors classified as response parse failures
    pub parse_errors: u64,
}
