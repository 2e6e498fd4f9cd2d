//! Metrics for the ticket client
//!
//! Prometheus collectors for search outcomes, RPC retries and stream
//! reconnects. Rendering them is left to the embedding application.

pub mod collector;

pub use collector::{MetricsCollector, SearchMetrics, TransportMetrics};
