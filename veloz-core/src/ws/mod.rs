pub mod backoff;
pub mod client;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use client::{MarketCodec, WsClient, WsClientConfig, WsCounters};
