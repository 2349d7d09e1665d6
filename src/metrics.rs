//! Process-wide Prometheus metrics, exposed at `GET /metrics`: one
//! `Registry`, gauges for live state, counters for cumulative events, one
//! latency histogram for the HTTP surface.

use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, register_histogram_with_registry,
    Counter, Gauge, Histogram, Registry,
};
use std::sync::Arc;

pub struct ClipSyncMetrics {
    pub active_pairs: Gauge,
    pub active_connections: Gauge,
    pub active_file_transfers: Gauge,
    pub pairs_minted_total: Counter,
    pub clipboard_relayed_total: Counter,
    pub chunks_forwarded_total: Counter,
    pub chunks_acked_total: Counter,
    pub files_completed_total: Counter,
    pub sessions_reaped_total: Counter,
    pub heartbeat_terminations_total: Counter,
    pub request_latency: Histogram,
    pub error_counts: Counter,
    pub registry: Arc<Registry>,
}

impl ClipSyncMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let active_pairs = register_gauge_with_registry!(
            "clipsync_active_pairs",
            "Number of sessions currently in the registry",
            registry
        )?;

        let active_connections = register_gauge_with_registry!(
            "clipsync_active_connections",
            "Number of bound role slots across all sessions",
            registry
        )?;

        let active_file_transfers = register_gauge_with_registry!(
            "clipsync_active_file_transfers",
            "Number of file records in sending or paused status",
            registry
        )?;

        let pairs_minted_total = register_counter_with_registry!(
            "clipsync_pairs_minted_total",
            "Total number of pairs minted via GET /pair",
            registry
        )?;

        let clipboard_relayed_total = register_counter_with_registry!(
            "clipsync_clipboard_relayed_total",
            "Total number of clipboard frames forwarded between peers",
            registry
        )?;

        let chunks_forwarded_total = register_counter_with_registry!(
            "clipsync_chunks_forwarded_total",
            "Total number of file_chunk frames forwarded to a receiver",
            registry
        )?;

        let chunks_acked_total = register_counter_with_registry!(
            "clipsync_chunks_acked_total",
            "Total number of file_chunk_ack frames observed from a receiver",
            registry
        )?;

        let files_completed_total = register_counter_with_registry!(
            "clipsync_files_completed_total",
            "Total number of file transfers that reached the completed status",
            registry
        )?;

        let sessions_reaped_total = register_counter_with_registry!(
            "clipsync_sessions_reaped_total",
            "Total number of sessions removed by the reaper",
            registry
        )?;

        let heartbeat_terminations_total = register_counter_with_registry!(
            "clipsync_heartbeat_terminations_total",
            "Total number of connections terminated for missing a heartbeat cycle",
            registry
        )?;

        let request_latency = register_histogram_with_registry!(
            "clipsync_http_request_latency_seconds",
            "HTTP handler latency in seconds",
            registry
        )?;

        let error_counts = register_counter_with_registry!(
            "clipsync_errors_total",
            "Total number of error frames sent to a client",
            registry
        )?;

        Ok(Self {
            active_pairs,
            active_connections,
            active_file_transfers,
            pairs_minted_total,
            clipboard_relayed_total,
            chunks_forwarded_total,
            chunks_acked_total,
            files_completed_total,
            sessions_reaped_total,
            heartbeat_terminations_total,
            request_latency,
            error_counts,
            registry,
        })
    }

    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for ClipSyncMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration is infallible for a fresh registry")
    }
}
