//! Metrics collection using Prometheus
//!
//! Counters and histograms for searches, RPC retries and watch reconnects.

use crate::error::TransportKind;
use crate::types::SearchState;
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the ticket client
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Search lifecycle metrics
    search_metrics: SearchMetrics,

    /// Transport metrics
    transport_metrics: TransportMetrics,
}

/// Search lifecycle metrics
#[derive(Clone)]
pub struct SearchMetrics {
    /// Searches started
    pub searches_started_total: IntCounter,

    /// Searches that reached a terminal state, by state
    pub search_outcomes_total: IntCounterVec,

    /// Searches currently creating a ticket or watching
    pub active_searches: IntGauge,

    /// Time from search start to assignment
    pub time_to_assignment_seconds: Histogram,
}

/// Transport metrics
#[derive(Clone)]
pub struct TransportMetrics {
    /// Retries of unary RPCs, by RPC
    pub rpc_retries_total: IntCounterVec,

    /// Failed RPCs, by RPC and kind
    pub rpc_errors_total: IntCounterVec,

    /// Assignment stream reconnects
    pub watch_reconnects_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let search_metrics = SearchMetrics::new(&registry)?;
        let transport_metrics = TransportMetrics::new(&registry)?;

        Ok(Self {
            registry,
            search_metrics,
            transport_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn search(&self) -> &SearchMetrics {
        &self.search_metrics
    }

    pub fn transport(&self) -> &TransportMetrics {
        &self.transport_metrics
    }

    pub fn record_search_started(&self) {
        self.search_metrics.searches_started_total.inc();
        self.search_metrics.active_searches.inc();
    }

    /// Record a terminal state. Call once per search.
    pub fn record_search_finished(&self, state: SearchState, elapsed: Duration) {
        self.search_metrics
            .search_outcomes_total
            .with_label_values(&[state.as_str()])
            .inc();
        self.search_metrics.active_searches.dec();

        if state == SearchState::Assigned {
            self.search_metrics
                .time_to_assignment_seconds
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_rpc_retry(&self, rpc: &str) {
        self.transport_metrics
            .rpc_retries_total
            .with_label_values(&[rpc])
            .inc();
    }

    pub fn record_rpc_error(&self, rpc: &str, kind: TransportKind) {
        self.transport_metrics
            .rpc_errors_total
            .with_label_values(&[rpc, kind.as_str()])
            .inc();
    }

    pub fn record_watch_reconnect(&self) {
        self.transport_metrics.watch_reconnects_total.inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}

impl SearchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let searches_started_total =
            IntCounter::new("match_ticket_searches_started_total", "Total searches started")?;
        registry.register(Box::new(searches_started_total.clone()))?;

        let search_outcomes_total = IntCounterVec::new(
            Opts::new(
                "match_ticket_search_outcomes_total",
                "Searches that reached a terminal state",
            ),
            &["state"],
        )?;
        registry.register(Box::new(search_outcomes_total.clone()))?;

        let active_searches = IntGauge::new(
            "match_ticket_active_searches",
            "Searches currently creating a ticket or watching",
        )?;
        registry.register(Box::new(active_searches.clone()))?;

        let time_to_assignment_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "match_ticket_time_to_assignment_seconds",
                "Time from search start to assignment",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(time_to_assignment_seconds.clone()))?;

        Ok(Self {
            searches_started_total,
            search_outcomes_total,
            active_searches,
            time_to_assignment_seconds,
        })
    }
}

impl TransportMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rpc_retries_total = IntCounterVec::new(
            Opts::new("match_ticket_rpc_retries_total", "Retried unary RPCs"),
            &["rpc"],
        )?;
        registry.register(Box::new(rpc_retries_total.clone()))?;

        let rpc_errors_total = IntCounterVec::new(
            Opts::new("match_ticket_rpc_errors_total", "Failed RPCs"),
            &["rpc", "kind"],
        )?;
        registry.register(Box::new(rpc_errors_total.clone()))?;

        let watch_reconnects_total = IntCounter::new(
            "match_ticket_watch_reconnects_total",
            "Assignment stream reconnects",
        )?;
        registry.register(Box::new(watch_reconnects_total.clone()))?;

        Ok(Self {
            rpc_retries_total,
            rpc_errors_total,
            watch_reconnects_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let _search = collector.search();
        let _transport = collector.transport();
    }

    #[test]
    fn test_search_lifecycle_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_search_started();
        assert_eq!(collector.search().active_searches.get(), 1);

        collector.record_search_finished(SearchState::Assigned, Duration::from_secs(3));
        assert_eq!(collector.search().active_searches.get(), 0);
        assert_eq!(
            collector
                .search()
                .search_outcomes_total
                .with_label_values(&["assigned"])
                .get(),
            1
        );
        assert_eq!(
            collector.search().time_to_assignment_seconds.get_sample_count(),
            1
        );
    }

    #[test]
    fn test_render_contains_metric_names() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        collector.record_rpc_retry("CreateTicket");
        collector.record_rpc_error("CreateTicket", TransportKind::Unavailable);
        collector.record_watch_reconnect();

        let text = collector.render().unwrap();
        assert!(text.contains("match_ticket_rpc_retries_total"));
        assert!(text.contains("match_ticket_watch_reconnects_total 1"));
    }

    #[test]
    fn test_separate_collectors_do_not_collide() {
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.record_search_started();
        assert_eq!(b.search().searches_started_total.get(), 0);
    }
}
