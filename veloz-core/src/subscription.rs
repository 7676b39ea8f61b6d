//! `(symbol, event_type) -> subscriber set` mapping (C3, §4.3).

use crate::model::{MarketEventType, SymbolId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    symbol: SymbolId,
    event_type: MarketEventType,
}

#[derive(Debug, Default)]
pub struct SubscriptionMgr {
    subs: HashMap<Key, HashSet<u64>>,
}

impl SubscriptionMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-subscribing the same triple is a no-op.
    pub fn subscribe(&mut self, symbol: SymbolId, event_type: MarketEventType, subscriber_id: u64) {
        self.subs
            .entry(Key { symbol, event_type })
            .or_default()
            .insert(subscriber_id);
    }

    /// Removes the key entirely once its subscriber set becomes empty.
    pub fn unsubscribe(&mut self, symbol: &SymbolId, event_type: MarketEventType, subscriber_id: u64) {
        let key = Key { symbol: symbol.clone(), event_type };
        if let Some(set) = self.subs.get_mut(&key) {
            set.remove(&subscriber_id);
            if set.is_empty() {
                self.subs.remove(&key);
            }
        }
    }

    pub fn is_active(&self, symbol: &SymbolId, event_type: MarketEventType) -> bool {
        self.subs
            .get(&Key { symbol: symbol.clone(), event_type })
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Unique symbols across all event types.
    pub fn active_symbols(&self) -> HashSet<SymbolId> {
        self.subs
            .keys()
            .filter(|k| self.subs.get(k).map(|s| !s.is_empty()).unwrap_or(false))
            .map(|k| k.symbol.clone())
            .collect()
    }

    /// Drop every subscriber-id entry belonging to `subscriber_id`, used
    /// when a consumer disconnects.
    pub fn remove_subscriber(&mut self, subscriber_id: u64) {
        self.subs.retain(|_, set| {
            set.remove(&subscriber_id);
            !set.is_empty()
        });
    }
}
