//! Market data metrics (C5, §2): latency histogram plus drop/gap/reconnect
//! counters, exported via Prometheus under the `veloz` namespace.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

pub struct MarketMetrics {
    registry: Arc<Registry>,
    /// `ts_pub_ns - ts_exchange_ns` per published event, in seconds.
    pub publish_latency_seconds: Histogram,
    pub events_dropped_total: IntCounterVec,
    pub book_gaps_total: IntCounterVec,
    pub book_resyncs_total: IntCounterVec,
    pub ws_reconnects_total: IntCounterVec,
}

impl MarketMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let publish_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "market_publish_latency_seconds",
                "Exchange-to-publish latency for market events",
            )
            .namespace("veloz")
            .buckets(vec![
                0.000_050, 0.000_100, 0.000_250, 0.000_500, 0.001, 0.005, 0.010, 0.050, 0.100,
                0.500, 1.0,
            ]),
        )?;
        registry.register(Box::new(publish_latency_seconds.clone()))?;

        let events_dropped_total = IntCounterVec::new(
            Opts::new("market_events_dropped_total", "Events dropped due to queue overflow")
                .namespace("veloz"),
            &["reason"],
        )?;
        registry.register(Box::new(events_dropped_total.clone()))?;

        let book_gaps_total = IntCounterVec::new(
            Opts::new("market_book_gaps_total", "Order book sequence gaps detected")
                .namespace("veloz"),
            &["symbol"],
        )?;
        registry.register(Box::new(book_gaps_total.clone()))?;

        let book_resyncs_total = IntCounterVec::new(
            Opts::new("market_book_resyncs_total", "Order book resync episodes")
                .namespace("veloz"),
            &["symbol"],
        )?;
        registry.register(Box::new(book_resyncs_total.clone()))?;

        let ws_reconnects_total = IntCounterVec::new(
            Opts::new("market_ws_reconnects_total", "WebSocket reconnect attempts")
                .namespace("veloz"),
            &["venue"],
        )?;
        registry.register(Box::new(ws_reconnects_total.clone()))?;

        Ok(Self {
            registry,
            publish_latency_seconds,
            events_dropped_total,
            book_gaps_total,
            book_resyncs_total,
            ws_reconnects_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_publish_latency(&self, ts_exchange_ns: i64, ts_pub_ns: i64) {
        let latency_ns = (ts_pub_ns - ts_exchange_ns).max(0);
        self.publish_latency_seconds.observe(latency_ns as f64 / 1e9);
    }

    pub fn reconnect_counter(&self, venue: &str) -> IntCounter {
        self.ws_reconnects_total.with_label_values(&[venue])
    }
}

impl Default for MarketMetrics {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("failed to initialize market metrics registry: {e}");
            panic!("cannot construct MarketMetrics")
        })
    }
}
