//! `WsClient -> ManagedOrderBook -> EventLoop` glue (C7, §2, §4 data flow).
//!
//! Decoded `MarketEvent`s land here from the venue `WsClient`. Book-shaped
//! events (`BookTop`/`BookDelta`) are folded into the symbol's
//! `ManagedOrderBook`; every event is posted to the `EventLoop` tagged
//! `symbol:*`, `type:*`, `venue:*` so C6 subscribers can filter without
//! knowing the market data internals.

use crate::event_loop::{EventLoop, Priority};
use crate::managed_book::ManagedOrderBook;
use crate::metrics::MarketMetrics;
use crate::model::{BookData, BookLevel, MarketEvent, MarketEventData, MarketEventType, SymbolId};
use crate::subscription::SubscriptionMgr;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct MarketDataConfig {
    pub book_buffer_cap: usize,
    pub resync_window_ns: i64,
    pub resync_alert_threshold: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self { book_buffer_cap: 1000, resync_window_ns: 60_000_000_000, resync_alert_threshold: 3 }
    }
}

pub struct MarketDataMgr {
    config: MarketDataConfig,
    books: Mutex<HashMap<SymbolId, ManagedOrderBook>>,
    subscriptions: Mutex<SubscriptionMgr>,
    event_loop: Arc<EventLoop>,
    metrics: Arc<MarketMetrics>,
}

impl MarketDataMgr {
    pub fn new(config: MarketDataConfig, event_loop: Arc<EventLoop>, metrics: Arc<MarketMetrics>) -> Self {
        Self {
            config,
            books: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(SubscriptionMgr::new()),
            event_loop,
            metrics,
        }
    }

    fn book_for(&self, symbol: &SymbolId) -> bool {
        let mut books = self.books.lock();
        let book = books.entry(symbol.clone()).or_insert_with(|| {
            ManagedOrderBook::new(
                self.config.book_buffer_cap,
                self.config.resync_window_ns,
                self.config.resync_alert_threshold,
            )
        });
        book.subscribe();
        book.needs_snapshot()
    }

    /// Registers `(symbol, event_type, subscriber_id)` in the subscription
    /// table (C3, §4.3), ensuring a book exists for the symbol. Returns
    /// `true` if a fresh snapshot should be requested from the venue.
    pub fn ensure_book_subscribed(
        &self,
        symbol: &SymbolId,
        event_type: MarketEventType,
        subscriber_id: u64,
    ) -> bool {
        self.subscriptions.lock().subscribe(symbol.clone(), event_type, subscriber_id);
        self.book_for(symbol)
    }

    /// Removes `(symbol, event_type, subscriber_id)` from the subscription
    /// table. Does not tear down the book itself; a book stays synced for
    /// the lifetime of the process once built, so a later re-subscribe never
    /// needs a fresh snapshot.
    pub fn remove_subscription(&self, symbol: &SymbolId, event_type: MarketEventType, subscriber_id: u64) {
        self.subscriptions.lock().unsubscribe(symbol, event_type, subscriber_id);
    }

    /// Symbols with at least one active subscription across any event type —
    /// what C7 uses to decide which venue streams must stay connected.
    pub fn active_symbols(&self) -> HashSet<SymbolId> {
        self.subscriptions.lock().active_symbols()
    }

    pub fn apply_snapshot(&self, symbol: &SymbolId, snapshot: BookData, now_ns: i64) -> bool {
        let mut books = self.books.lock();
        let applied = books
            .get_mut(symbol)
            .map(|book| book.on_snapshot(snapshot, now_ns))
            .unwrap_or(false);
        if applied {
            self.metrics.book_resyncs_total.with_label_values(&[&symbol.0]).inc();
        }
        applied
    }

    /// Feed one decoded venue event through the book (if applicable) and
    /// fan it out on the event loop.
    pub fn on_event(&self, event: MarketEvent) {
        self.metrics.observe_publish_latency(event.ts_exchange_ns, event.ts_pub_ns);

        if let MarketEventData::BookDelta { ref bids, ref asks, first_update_id, final_update_id } = event.data {
            self.fold_delta(&event.symbol, bids, asks, first_update_id, final_update_id, event.ts_recv_ns);
        }

        self.publish(event);
    }

    fn fold_delta(
        &self,
        symbol: &SymbolId,
        bids: &[BookLevel],
        asks: &[BookLevel],
        first_update_id: u64,
        final_update_id: u64,
        now_ns: i64,
    ) {
        let mut books = self.books.lock();
        if let Some(book) = books.get_mut(symbol) {
            let delta = BookData {
                bids: bids.to_vec(),
                asks: asks.to_vec(),
                sequence: final_update_id,
                first_update_id,
                is_snapshot: false,
            };
            let gap_count_before = book.gap_count();
            book.on_delta(delta, now_ns);
            if book.gap_count() > gap_count_before {
                self.metrics.book_gaps_total.with_label_values(&[&symbol.0]).inc();
            }
            if book.take_desync_alert() {
                tracing::warn!(symbol = %symbol, "book_desync alert raised");
            }
        }
    }

    fn publish(&self, event: MarketEvent) {
        let tags = [
            format!("symbol:{}", event.symbol),
            format!("type:{:?}", event.event_type),
            format!("venue:{}", event.venue),
        ];
        let priority = match event.event_type {
            MarketEventType::Trade | MarketEventType::BookTop | MarketEventType::BookDelta => {
                Priority::High
            }
            _ => Priority::Normal,
        };
        self.event_loop.post(priority, tags, move || {
            tracing::trace!(symbol = %event.symbol, event_type = ?event.event_type, "market event dispatched");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Side, Venue, MarketKind};

    fn trade_event(symbol: &str) -> MarketEvent {
        MarketEvent {
            event_type: MarketEventType::Trade,
            venue: Venue::Binance,
            market: MarketKind::Spot,
            symbol: SymbolId::new(symbol),
            ts_exchange_ns: 0,
            ts_recv_ns: 1,
            ts_pub_ns: 2,
            data: MarketEventData::Trade { price: 100.0, qty: 1.0, side: Side::Buy },
        }
    }

    #[test]
    fn new_symbol_subscription_requests_snapshot() {
        let el = Arc::new(EventLoop::new(1));
        let metrics = Arc::new(MarketMetrics::new().unwrap());
        let mgr = MarketDataMgr::new(MarketDataConfig::default(), el, metrics);
        let symbol = SymbolId::new("BTCUSDT");
        assert!(mgr.ensure_book_subscribed(&symbol, MarketEventType::Trade, 1));
        assert!(mgr.active_symbols().contains(&symbol));
    }

    #[test]
    fn unsubscribing_last_event_type_drops_symbol_from_active_set() {
        let el = Arc::new(EventLoop::new(1));
        let metrics = Arc::new(MarketMetrics::new().unwrap());
        let mgr = MarketDataMgr::new(MarketDataConfig::default(), el, metrics);
        let symbol = SymbolId::new("ETHUSDT");
        mgr.ensure_book_subscribed(&symbol, MarketEventType::Trade, 1);
        mgr.remove_subscription(&symbol, MarketEventType::Trade, 1);
        assert!(!mgr.active_symbols().contains(&symbol));
    }

    #[test]
    fn on_event_publishes_without_panicking() {
        let el = Arc::new(EventLoop::new(1));
        let metrics = Arc::new(MarketMetrics::new().unwrap());
        let mgr = MarketDataMgr::new(MarketDataConfig::default(), el, metrics);
        mgr.on_event(trade_event("BTCUSDT"));
    }

    fn delta_event(symbol: &str, first_update_id: u64, final_update_id: u64) -> MarketEvent {
        MarketEvent {
            event_type: MarketEventType::BookDelta,
            venue: Venue::Binance,
            market: MarketKind::Spot,
            symbol: SymbolId::new(symbol),
            ts_exchange_ns: 0,
            ts_recv_ns: 1,
            ts_pub_ns: 2,
            data: MarketEventData::BookDelta {
                bids: vec![BookLevel { price: 100.0, qty: 1.0 }],
                asks: vec![BookLevel { price: 101.0, qty: 1.0 }],
                first_update_id,
                final_update_id,
            },
        }
    }

    #[test]
    fn contiguous_deltas_against_a_synced_book_do_not_count_as_gaps() {
        let el = Arc::new(EventLoop::new(1));
        let metrics = Arc::new(MarketMetrics::new().unwrap());
        let mgr = MarketDataMgr::new(MarketDataConfig::default(), Arc::clone(&el), Arc::clone(&metrics));
        let symbol = SymbolId::new("BTCUSDT");
        mgr.ensure_book_subscribed(&symbol, MarketEventType::BookDelta, 1);
        mgr.apply_snapshot(
            &symbol,
            BookData {
                bids: vec![BookLevel { price: 99.0, qty: 1.0 }],
                asks: vec![BookLevel { price: 102.0, qty: 1.0 }],
                sequence: 100,
                first_update_id: 0,
                is_snapshot: true,
            },
            0,
        );

        mgr.on_event(delta_event("BTCUSDT", 101, 101));
        mgr.on_event(delta_event("BTCUSDT", 102, 102));

        assert_eq!(metrics.book_gaps_total.with_label_values(&["BTCUSDT"]).get(), 0);
    }
}
