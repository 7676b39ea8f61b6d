//! Venue routing and the exchange adapter trait (C11, §4.8).

use crate::error::AdapterError;
use crate::model::{ExecutionReport, OrderRequest, Venue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a venue connector must provide. Implementations own their own
/// connection lifecycle; `OrderRouter` only ever calls through this trait.
pub trait ExchangeAdapter: Send + Sync {
    fn place_order(&self, request: &OrderRequest) -> Result<ExecutionReport, AdapterError>;
    fn cancel_order(&self, client_order_id: &str) -> Result<ExecutionReport, AdapterError>;
    fn is_connected(&self) -> bool;
    fn connect(&self) -> Result<(), AdapterError>;
    fn disconnect(&self) -> Result<(), AdapterError>;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
}

/// Maps `Venue -> ExchangeAdapter`, with an optional default venue used when
/// a request doesn't name one explicitly.
#[derive(Default)]
pub struct OrderRouter {
    adapters: HashMap<Venue, Box<dyn ExchangeAdapter>>,
    default_venue: Option<Venue>,
}

impl OrderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, venue: Venue, adapter: Box<dyn ExchangeAdapter>) {
        self.adapters.insert(venue, adapter);
    }

    pub fn set_default_venue(&mut self, venue: Venue) {
        self.default_venue = Some(venue);
    }

    fn resolve(&self, venue: Option<Venue>) -> Result<&dyn ExchangeAdapter, AdapterError> {
        let venue = venue.or(self.default_venue).ok_or(AdapterError::NoRoute)?;
        self.adapters
            .get(&venue)
            .map(|a| a.as_ref())
            .ok_or(AdapterError::NoRoute)
    }

    pub fn place_order(
        &self,
        venue: Option<Venue>,
        request: &OrderRequest,
    ) -> Result<ExecutionReport, AdapterError> {
        self.resolve(venue)?.place_order(request)
    }

    pub fn cancel_order(
        &self,
        venue: Option<Venue>,
        client_order_id: &str,
    ) -> Result<ExecutionReport, AdapterError> {
        self.resolve(venue)?.cancel_order(client_order_id)
    }
}

/// Components of a parsed `ClientOrderId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClientOrderId {
    pub strategy: String,
    pub timestamp: u64,
    pub tail: String,
}

/// Generates `"{strategy}-{unix_seconds}-{process_sequence}-{4_hex_random}"`
/// ids. The sequence is a per-generator monotonic counter, safe to share
/// across threads behind an `Arc`; combined with a process-lifetime random
/// salt this keeps ids unique across processes without coordination.
pub struct ClientOrderIdGenerator {
    sequence: AtomicU64,
}

impl Default for ClientOrderIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientOrderIdGenerator {
    pub fn new() -> Self {
        Self { sequence: AtomicU64::new(0) }
    }

    pub fn generate(&self, strategy: &str, unix_seconds: u64) -> String {
        use rand::Rng;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let salt: u16 = rand::thread_rng().gen();
        format!("{strategy}-{unix_seconds}-{seq}-{salt:04x}")
    }

    pub fn parse(id: &str) -> Option<ParsedClientOrderId> {
        let mut parts = id.rsplitn(4, '-');
        let tail = parts.next()?;
        let _sequence = parts.next()?;
        let timestamp = parts.next()?;
        let strategy = parts.next()?;

        Some(ParsedClientOrderId {
            strategy: strategy.to_string(),
            timestamp: timestamp.parse().ok()?,
            tail: tail.to_string(),
        })
    }
}
