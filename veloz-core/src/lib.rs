//! Core trading-engine primitives: order book, event loop, risk, routing,
//! persistence, and the bridge/broadcaster surfaces consumed by `veloz-engine`.

pub mod bridge;
pub mod broadcaster;
pub mod command;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod logging;
pub mod managed_book;
pub mod market_data;
pub mod metrics;
pub mod model;
pub mod order_store;
pub mod orderbook;
pub mod persistence;
pub mod position;
pub mod queue;
pub mod rate_limiter;
pub mod risk;
pub mod router;
pub mod subscription;
pub mod ws;

pub use config::Config;
pub use error::{
    AdapterError, BookDesyncError, BridgeError, CircuitOpenError, CommandParseError, ConfigError,
    InvalidTransition, PersistenceError, RiskRejection, WsError,
};
pub use model::{
    BookData, BookLevel, ExecutionReport, MarketEvent, MarketEventData, MarketEventType, MarketKind,
    OrderRecord, OrderRequest, OrderStatus, OrderType, Position, Side, Subscription, SymbolId,
    TimeInForce, Venue, EPSILON,
};
