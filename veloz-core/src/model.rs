//! Shared data model (§3): symbols, venues, market events, orders, positions.
//!
//! Price and quantity fields are plain `f64` throughout, per the wire
//! contract the engine speaks; equality/threshold comparisons that need a
//! tolerance use [`EPSILON`] rather than exact float comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance used wherever the spec says "ε" (position collapse, fill
/// accounting bounds, price-deviation checks).
pub const EPSILON: f64 = 1e-9;

/// Interned textual symbol, always uppercase (e.g. `BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub String);

impl SymbolId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().to_ascii_uppercase())
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Closed venue tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Okx,
    Bybit,
    Coinbase,
    Unknown,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Bybit => "bybit",
            Self::Coinbase => "coinbase",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Venue {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "binance" => Self::Binance,
            "okx" => Self::Okx,
            "bybit" => Self::Bybit,
            "coinbase" => Self::Coinbase,
            _ => Self::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spot,
    Futures,
    Unknown,
}

/// A single price/quantity level. `qty == 0` on a delta means delete.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

/// Raw snapshot-or-delta payload as received from a venue, before being
/// folded into an `OrderBook` by `ManagedOrderBook`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookData {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub sequence: u64,
    pub first_update_id: u64,
    pub is_snapshot: bool,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

/// Status of an `OrderRecord`. Terminal = `{Filled, Canceled, Rejected,
/// Expired}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Accepted => "Accepted",
            Self::PartiallyFilled => "PartiallyFilled",
            Self::Filled => "Filled",
            Self::Canceled => "Canceled",
            Self::Rejected => "Rejected",
            Self::Expired => "Expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-originated order request. `client_order_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: SymbolId,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub qty: f64,
    pub price: Option<f64>,
    pub tif: TimeInForce,
    pub client_order_id: String,
}

/// Venue-issued update for an order, possibly carrying a partial fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    pub last_fill_qty: Option<f64>,
    pub last_fill_price: Option<f64>,
    pub reason: Option<String>,
}

/// An order's full lifecycle state, owned by `OrderStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub request: OrderRequest,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    pub cum_qty: f64,
    pub avg_price: f64,
    pub created_ns: i64,
    pub last_ns: i64,
    pub reason: Option<String>,
}

impl OrderRecord {
    pub fn new(request: OrderRequest, now_ns: i64) -> Self {
        Self {
            request,
            venue_order_id: None,
            status: OrderStatus::New,
            cum_qty: 0.0,
            avg_price: 0.0,
            created_ns: now_ns,
            last_ns: now_ns,
            reason: None,
        }
    }
}

/// Per-symbol position: signed size, quantity-weighted average price, and
/// cumulative realized PnL. `side = sign(size)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: SymbolId,
    pub size: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn flat(symbol: SymbolId) -> Self {
        Self { symbol, size: 0.0, avg_price: 0.0, realized_pnl: 0.0 }
    }

    pub fn is_flat(&self) -> bool {
        self.size.abs() < EPSILON
    }

    pub fn side(&self) -> Option<Side> {
        if self.size > EPSILON {
            Some(Side::Buy)
        } else if self.size < -EPSILON {
            Some(Side::Sell)
        } else {
            None
        }
    }

    /// Unrealized PnL at mark price `m`.
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.size.signum() * (mark - self.avg_price) * self.size.abs()
    }
}

/// One of the event types an `(symbol, event_type)` subscription tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketEventType {
    Trade,
    BookTop,
    BookDelta,
    Kline,
    Ticker,
    FundingRate,
    MarkPrice,
}

/// Tagged payload carried by a `MarketEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MarketEventData {
    Trade { price: f64, qty: f64, side: Side },
    BookTop { bid_price: f64, bid_qty: f64, ask_price: f64, ask_qty: f64 },
    BookDelta { bids: Vec<BookLevel>, asks: Vec<BookLevel>, first_update_id: u64, final_update_id: u64 },
    Kline { open: f64, high: f64, low: f64, close: f64, volume: f64 },
    Ticker { last_price: f64, volume_24h: f64 },
    FundingRate { rate: f64, next_funding_ns: i64 },
    MarkPrice { price: f64 },
}

/// A fully timestamped market data event flowing out of C7 into C6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub event_type: MarketEventType,
    pub venue: Venue,
    pub market: MarketKind,
    pub symbol: SymbolId,
    pub ts_exchange_ns: i64,
    pub ts_recv_ns: i64,
    pub ts_pub_ns: i64,
    pub data: MarketEventData,
}

impl MarketEvent {
    /// `exchange_to_pub_ns`, clamped to 0 on clock skew.
    pub fn exchange_to_pub_ns(&self) -> i64 {
        (self.ts_pub_ns - self.ts_exchange_ns).max(0)
    }

    /// `recv_to_pub_ns`, clamped to 0 on clock skew.
    pub fn recv_to_pub_ns(&self) -> i64 {
        (self.ts_pub_ns - self.ts_recv_ns).max(0)
    }
}

/// Identity of a subscription: `(symbol, event_type, subscriber_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub symbol: SymbolId,
    pub event_type: MarketEventType,
    pub subscriber_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_id_uppercases() {
        assert_eq!(SymbolId::new("btcusdt").0, "BTCUSDT");
    }

    #[test]
    fn position_collapses_near_zero() {
        let p = Position { symbol: SymbolId::new("BTCUSDT"), size: 1e-12, avg_price: 100.0, realized_pnl: 5.0 };
        assert!(p.is_flat());
        assert!(p.side().is_none());
    }

    #[test]
    fn market_event_clamps_clock_skew() {
        let ev = MarketEvent {
            event_type: MarketEventType::Trade,
            venue: Venue::Binance,
            market: MarketKind::Spot,
            symbol: SymbolId::new("ETHUSDT"),
            ts_exchange_ns: 100,
            ts_recv_ns: 200,
            ts_pub_ns: 50,
            data: MarketEventData::Trade { price: 1.0, qty: 1.0, side: Side::Buy },
        };
        assert_eq!(ev.exchange_to_pub_ns(), 0);
        assert_eq!(ev.recv_to_pub_ns(), 0);
    }
}
