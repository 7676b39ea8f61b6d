//! SSE-shaped event broadcaster (C15, §4.12, §6.3).
//!
//! Holds a ring buffer of the last N events plus per-subscriber cursors.
//! Subscribing with `last_id` replays everything with `id > last_id` before
//! the subscriber is considered live. Independent of C14's callback-based
//! `EngineBridge` — this is the SSE-facing sibling.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastEventType {
    MarketData,
    OrderUpdate,
    Account,
    System,
    Error,
    KeepAlive,
}

impl BroadcastEventType {
    fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market-data",
            Self::OrderUpdate => "order-update",
            Self::Account => "account",
            Self::System => "system",
            Self::Error => "error",
            Self::KeepAlive => "keepalive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub id: u64,
    pub event_type: BroadcastEventType,
    pub data: serde_json::Value,
}

impl BroadcastEvent {
    /// Renders the `id`/`event`/`data`/`retry` block of §6.3.
    pub fn to_sse(&self, retry_ms: Option<u64>) -> String {
        let mut out = format!(
            "id: {}\nevent: {}\ndata: {}\n",
            self.id,
            self.event_type.as_str(),
            self.data
        );
        if let Some(retry) = retry_ms {
            out.push_str(&format!("retry: {retry}\n"));
        }
        out.push('\n');
        out
    }
}

pub fn serialize_payload<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

struct Subscriber {
    cursor: u64,
    filter: Option<Vec<BroadcastEventType>>,
}

struct Inner {
    ring: VecDeque<BroadcastEvent>,
    ring_cap: usize,
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

pub struct EventBroadcaster {
    inner: Mutex<Inner>,
    next_sub_id: AtomicU64,
    max_subscriptions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxSubscriptionsError;

impl EventBroadcaster {
    pub fn new(ring_cap: usize, max_subscriptions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(ring_cap.max(1)),
                ring_cap: ring_cap.max(1),
                next_id: 1,
                subscribers: HashMap::new(),
            }),
            next_sub_id: AtomicU64::new(1),
            max_subscriptions,
        }
    }

    /// Publish a new event, assigning it the next monotonic id.
    pub fn publish(&self, event_type: BroadcastEventType, data: serde_json::Value) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.ring.push_back(BroadcastEvent { id, event_type, data });
        if inner.ring.len() > inner.ring_cap {
            inner.ring.pop_front();
        }
        id
    }

    /// Emit a `KeepAlive` event; callers drive the interval timer.
    pub fn keep_alive(&self) -> u64 {
        self.publish(BroadcastEventType::KeepAlive, serde_json::Value::Null)
    }

    /// Register a subscriber at `last_id` (0 if none), returning its id.
    pub fn subscribe(
        &self,
        last_id: u64,
        filter: Option<Vec<BroadcastEventType>>,
    ) -> Result<u64, MaxSubscriptionsError> {
        let mut inner = self.inner.lock();
        if inner.subscribers.len() >= self.max_subscriptions {
            return Err(MaxSubscriptionsError);
        }
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        inner.subscribers.insert(sub_id, Subscriber { cursor: last_id, filter });
        Ok(sub_id)
    }

    pub fn unsubscribe(&self, sub_id: u64) {
        self.inner.lock().subscribers.remove(&sub_id);
    }

    /// Replay-then-live: every buffered event with `id > cursor` matching
    /// the subscriber's filter, advancing its cursor past what it returns.
    pub fn drain(&self, sub_id: u64) -> Vec<BroadcastEvent> {
        let mut inner = self.inner.lock();
        let Some((cursor, filter)) =
            inner.subscribers.get(&sub_id).map(|s| (s.cursor, s.filter.clone()))
        else {
            return Vec::new();
        };

        let matching: Vec<BroadcastEvent> = inner
            .ring
            .iter()
            .filter(|e| e.id > cursor)
            .filter(|e| filter.as_ref().map(|f| f.contains(&e.event_type)).unwrap_or(true))
            .cloned()
            .collect();

        if let Some(last) = matching.last() {
            if let Some(s) = inner.subscribers.get_mut(&sub_id) {
                s.cursor = last.id;
            }
        }
        matching
    }
}

impl Clone for BroadcastEvent {
    fn clone(&self) -> Self {
        Self { id: self.id, event_type: self.event_type, data: self.data.clone() }
    }
}

pub fn shared(ring_cap: usize, max_subscriptions: usize) -> Arc<EventBroadcaster> {
    Arc::new(EventBroadcaster::new(ring_cap, max_subscriptions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_replays_buffered_events_after_last_id() {
        let bc = EventBroadcaster::new(100, 10);
        bc.publish(BroadcastEventType::MarketData, serde_json::json!({"a": 1}));
        let id2 = bc.publish(BroadcastEventType::MarketData, serde_json::json!({"a": 2}));
        bc.publish(BroadcastEventType::MarketData, serde_json::json!({"a": 3}));

        let sub = bc.subscribe(id2, None).unwrap();
        let replayed = bc.drain(sub);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].data, serde_json::json!({"a": 3}));
    }

    #[test]
    fn fresh_subscriber_replays_everything() {
        let bc = EventBroadcaster::new(100, 10);
        bc.publish(BroadcastEventType::System, serde_json::Value::Null);
        bc.publish(BroadcastEventType::System, serde_json::Value::Null);
        let sub = bc.subscribe(0, None).unwrap();
        assert_eq!(bc.drain(sub).len(), 2);
    }

    #[test]
    fn filter_only_matches_requested_types() {
        let bc = EventBroadcaster::new(100, 10);
        bc.publish(BroadcastEventType::MarketData, serde_json::Value::Null);
        bc.publish(BroadcastEventType::Error, serde_json::Value::Null);
        let sub = bc.subscribe(0, Some(vec![BroadcastEventType::Error])).unwrap();
        let drained = bc.drain(sub);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event_type, BroadcastEventType::Error);
    }

    #[test]
    fn exhausted_subscription_slots_return_error() {
        let bc = EventBroadcaster::new(100, 1);
        bc.subscribe(0, None).unwrap();
        assert_eq!(bc.subscribe(0, None), Err(MaxSubscriptionsError));
    }

    #[test]
    fn ring_buffer_drops_oldest_beyond_capacity() {
        let bc = EventBroadcaster::new(2, 10);
        bc.publish(BroadcastEventType::System, serde_json::Value::Null);
        bc.publish(BroadcastEventType::System, serde_json::Value::Null);
        let third = bc.publish(BroadcastEventType::System, serde_json::Value::Null);
        let sub = bc.subscribe(0, None).unwrap();
        let drained = bc.drain(sub);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained.last().unwrap().id, third);
    }

    #[test]
    fn sse_formatting_matches_protocol() {
        let event = BroadcastEvent {
            id: 7,
            event_type: BroadcastEventType::MarketData,
            data: serde_json::json!({"x": 1}),
        };
        let rendered = event.to_sse(Some(5000));
        assert_eq!(rendered, "id: 7\nevent: market-data\ndata: {\"x\":1}\nretry: 5000\n\n");
    }
}
