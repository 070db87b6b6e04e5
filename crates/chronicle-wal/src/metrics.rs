//! Prometheus metrics for the write-ahead log.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Metrics reported by a WAL instance.
///
/// All metrics exist regardless of registration; passing a registry
/// makes them scrapeable.
#[derive(Clone)]
pub(crate) struct WalMetrics {
    pub fsync_duration: Histogram,
    pub page_flushes: IntCounter,
    pub page_completions: IntCounter,
    pub truncate_total: IntCounter,
    pub truncate_failed: IntCounter,
    pub writes_failed: IntCounter,
    pub current_segment: IntGauge,
}

impl WalMetrics {
    pub fn new(registry: Option<&Registry>) -> Self {
        let fsync_duration = Histogram::with_opts(HistogramOpts::new(
            "chronicle_wal_fsync_duration_seconds",
            "Duration of WAL fsync.",
        ))
        .expect("metric can be created");
        let page_flushes = IntCounter::new(
            "chronicle_wal_page_flushes_total",
            "Total number of page flushes.",
        )
        .expect("metric can be created");
        let page_completions = IntCounter::new(
            "chronicle_wal_completed_pages_total",
            "Total number of completed pages.",
        )
        .expect("metric can be created");
        let truncate_total = IntCounter::new(
            "chronicle_wal_truncations_total",
            "Total number of WAL truncations attempted.",
        )
        .expect("metric can be created");
        let truncate_failed = IntCounter::new(
            "chronicle_wal_truncations_failed_total",
            "Total number of WAL truncations that failed.",
        )
        .expect("metric can be created");
        let writes_failed = IntCounter::new(
            "chronicle_wal_writes_failed_total",
            "Total number of WAL writes that failed.",
        )
        .expect("metric can be created");
        let current_segment = IntGauge::new(
            "chronicle_wal_segment_current",
            "WAL segment index currently being written to.",
        )
        .expect("metric can be created");

        let metrics = Self {
            fsync_duration,
            page_flushes,
            page_completions,
            truncate_total,
            truncate_failed,
            writes_failed,
            current_segment,
        };

        if let Some(r) = registry {
            r.register(Box::new(metrics.fsync_duration.clone()))
                .expect("collector can be registered");
            r.register(Box::new(metrics.page_flushes.clone()))
                .expect("collector can be registered");
            r.register(Box::new(metrics.page_completions.clone()))
                .expect("collector can be registered");
            r.register(Box::new(metrics.truncate_total.clone()))
                .expect("collector can be registered");
            r.register(Box::new(metrics.truncate_failed.clone()))
                .expect("collector can be registered");
            r.register(Box::new(metrics.writes_failed.clone()))
                .expect("collector can be registered");
            r.register(Box::new(metrics.current_segment.clone()))
                .expect("collector can be registered");
        }

        metrics
    }
}
