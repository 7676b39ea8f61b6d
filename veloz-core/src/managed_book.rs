//! Snapshot+delta book synchronization (C2, §4.2).
//!
//! Drives a [`crate::orderbook::OrderBook`] against Binance-style
//! "snapshot plus buffered deltas" semantics: while waiting for a fresh
//! snapshot, incoming deltas are buffered; once a snapshot lands, the
//! buffered deltas are validated against it and either replayed (success)
//! or discarded and a new snapshot requested (failure).

use crate::model::BookData;
use crate::orderbook::OrderBook;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    Uninit,
    Syncing,
    Synced,
    Resyncing,
}

pub struct ManagedOrderBook {
    book: OrderBook,
    state: BookState,
    buffered: VecDeque<BookData>,
    buffer_cap: usize,
    /// Sequence the last applied delta left the book at; the next delta in
    /// `Synced` state must satisfy `first_update_id == prev_sequence + 1`.
    prev_sequence: u64,
    gap_count: u64,
    resync_timestamps: VecDeque<i64>,
    resync_window_ns: i64,
    resync_alert_threshold: usize,
    /// Set once per resync episode until a caller consumes it via
    /// [`Self::take_desync_alert`].
    desync_pending: bool,
}

impl ManagedOrderBook {
    pub fn new(buffer_cap: usize, resync_window_ns: i64, resync_alert_threshold: usize) -> Self {
        Self {
            book: OrderBook::new(),
            state: BookState::Uninit,
            buffered: VecDeque::new(),
            buffer_cap,
            prev_sequence: 0,
            gap_count: 0,
            resync_timestamps: VecDeque::new(),
            resync_window_ns,
            resync_alert_threshold,
            desync_pending: false,
        }
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// `Uninit -> Syncing` on first subscription.
    pub fn subscribe(&mut self) {
        if self.state == BookState::Uninit {
            self.state = BookState::Syncing;
        }
    }

    pub fn needs_snapshot(&self) -> bool {
        matches!(self.state, BookState::Syncing | BookState::Resyncing)
    }

    /// Feed an incremental delta. In `Syncing`/`Resyncing` it is buffered;
    /// in `Synced` it is applied if contiguous, otherwise triggers a resync.
    pub fn on_delta(&mut self, delta: BookData, now_ns: i64) {
        match self.state {
            BookState::Uninit => {}
            BookState::Syncing | BookState::Resyncing => {
                self.buffered.push_back(delta);
                if self.buffered.len() > self.buffer_cap {
                    self.buffered.pop_front();
                    self.gap_count += 1;
                }
            }
            BookState::Synced => {
                if delta.first_update_id == self.prev_sequence + 1 {
                    self.apply(&delta);
                    self.prev_sequence = delta.sequence;
                } else {
                    self.enter_resync(now_ns);
                    self.buffered.push_back(delta);
                }
            }
        }
    }

    /// Feed a freshly fetched snapshot. Returns `true` if it (plus any
    /// buffered deltas that validated against it) brought the book to
    /// `Synced`; `false` means the snapshot was discarded and a fresh one
    /// must be requested.
    pub fn on_snapshot(&mut self, snapshot: BookData, now_ns: i64) -> bool {
        if !self.needs_snapshot() {
            return false;
        }
        let seq = snapshot.sequence;
        self.buffered.retain(|d| d.sequence > seq);

        let boundary_ok = match self.buffered.front() {
            None => true,
            Some(first) => first.first_update_id <= seq + 1 && seq + 1 <= first.sequence,
        };

        if !boundary_ok {
            self.buffered.clear();
            self.enter_resync(now_ns);
            return false;
        }

        self.book.apply_snapshot(&snapshot.bids, &snapshot.asks, seq);
        let pending = std::mem::take(&mut self.buffered);
        for d in &pending {
            self.apply(d);
        }
        self.prev_sequence = self.book.sequence();
        self.state = BookState::Synced;
        self.book.is_stale = false;
        true
    }

    fn apply(&mut self, d: &BookData) {
        for l in &d.bids {
            self.book.apply_delta(*l, true, d.sequence);
        }
        for l in &d.asks {
            self.book.apply_delta(*l, false, d.sequence);
        }
    }

    fn enter_resync(&mut self, now_ns: i64) {
        self.state = BookState::Resyncing;
        self.book.is_stale = true;
        self.gap_count += 1;

        self.resync_timestamps.push_back(now_ns);
        while let Some(&front) = self.resync_timestamps.front() {
            if now_ns - front > self.resync_window_ns {
                self.resync_timestamps.pop_front();
            } else {
                break;
            }
        }
        if self.resync_timestamps.len() >= self.resync_alert_threshold {
            self.desync_pending = true;
        }
    }

    /// Consume the pending `book_desync` alert, if any (raised at most once
    /// per episode of repeated resyncs within the sliding window).
    pub fn take_desync_alert(&mut self) -> bool {
        std::mem::take(&mut self.desync_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookLevel;

    fn deltas(first: u64, seq: u64, bid: f64) -> BookData {
        BookData {
            bids: vec![BookLevel { price: bid, qty: 1.0 }],
            asks: vec![],
            sequence: seq,
            first_update_id: first,
            is_snapshot: false,
        }
    }

    fn snapshot(seq: u64) -> BookData {
        BookData {
            bids: vec![BookLevel { price: 100.0, qty: 1.0 }],
            asks: vec![BookLevel { price: 101.0, qty: 1.0 }],
            sequence: seq,
            first_update_id: 0,
            is_snapshot: true,
        }
    }

    #[test]
    fn clean_sync_from_uninit() {
        let mut mob = ManagedOrderBook::new(64, 1_000_000_000, 3);
        mob.subscribe();
        assert_eq!(mob.state(), BookState::Syncing);

        mob.on_delta(deltas(1, 1, 99.0), 0);
        assert!(mob.on_snapshot(snapshot(0), 0));
        assert_eq!(mob.state(), BookState::Synced);
    }

    #[test]
    fn resync_scenario_from_spec() {
        // Snapshot lastUpdateId=100, then a delta with a gap at 101 forces
        // a resync; a fresh snapshot at 110 with a contiguous delta at 111
        // applies cleanly.
        let mut mob = ManagedOrderBook::new(64, 1_000_000_000, 10);
        mob.subscribe();
        assert!(mob.on_snapshot(snapshot(100), 0));
        assert_eq!(mob.state(), BookState::Synced);

        mob.on_delta(deltas(102, 103, 98.0), 1);
        assert_eq!(mob.state(), BookState::Resyncing);

        assert!(mob.on_snapshot(snapshot(110), 2));
        assert_eq!(mob.state(), BookState::Synced);

        mob.on_delta(deltas(111, 111, 97.0), 3);
        assert_eq!(mob.state(), BookState::Synced);
    }

    #[test]
    fn buffer_overflow_drops_oldest_and_counts_gap() {
        let mut mob = ManagedOrderBook::new(2, 1_000_000_000, 100);
        mob.subscribe();
        mob.on_delta(deltas(1, 1, 1.0), 0);
        mob.on_delta(deltas(2, 2, 1.0), 0);
        mob.on_delta(deltas(3, 3, 1.0), 0);
        assert_eq!(mob.gap_count(), 1);
    }

    #[test]
    fn repeated_resyncs_raise_desync_alert() {
        let mut mob = ManagedOrderBook::new(64, 1_000_000_000, 2);
        mob.subscribe();
        assert!(mob.on_snapshot(snapshot(1), 0));
        mob.on_delta(deltas(5, 6, 1.0), 0);
        assert!(!mob.take_desync_alert());

        assert!(mob.on_snapshot(snapshot(10), 0));
        mob.on_delta(deltas(20, 21, 1.0), 0);
        assert!(mob.take_desync_alert());
        assert!(!mob.take_desync_alert());
    }
}
