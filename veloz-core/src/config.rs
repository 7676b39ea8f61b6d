//! Aggregate engine configuration (§10.3): a TOML file layer with
//! `VELOZ_`-prefixed, `__`-nested environment variable overrides on top,
//! mirroring the layered `config`-crate loading this engine's config
//! module has always reached for (file defaults, env overrides, explicit
//! validation before the engine trusts any of it). The sub-configs
//! (`RiskConfig`, `CircuitBreakerConfig`, ...) already live next to the
//! modules they configure; this is just the top-level envelope the binary
//! loads once at startup.

use crate::error::ConfigError;
use crate::market_data::MarketDataConfig;
use crate::rate_limiter::RateLimiterConfig as RateLimiterCoreConfig;
use crate::risk::{CircuitBreakerConfig, RiskConfig};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    pub worker_count: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub queue_capacity: usize,
    pub max_subscriptions: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { queue_capacity: 4096, max_subscriptions: 64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    pub ring_cap: usize,
    pub max_subscriptions: usize,
    pub retry_ms: Option<u64>,
    pub keep_alive_interval_secs: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self { ring_cap: 1000, max_subscriptions: 64, retry_ms: Some(3000), keep_alive_interval_secs: 15 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub snapshot_dir: String,
    pub max_snapshots: usize,
    pub snapshot_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { snapshot_dir: "./snapshots".to_string(), max_snapshots: 10, snapshot_interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterSection {
    pub capacity: u64,
    pub refill_rate: f64,
    pub bucket_ttl_ms: u64,
}

impl Default for RateLimiterSection {
    fn default() -> Self {
        let d = RateLimiterCoreConfig::default();
        Self { capacity: d.capacity, refill_rate: d.refill_rate, bucket_ttl_ms: d.bucket_ttl_ms }
    }
}

impl From<RateLimiterSection> for RateLimiterCoreConfig {
    fn from(s: RateLimiterSection) -> Self {
        RateLimiterCoreConfig { capacity: s.capacity, refill_rate: s.refill_rate, bucket_ttl_ms: s.bucket_ttl_ms }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RiskConfigSection {
    pub account_balance: f64,
    pub max_position_size: f64,
    pub reference_price: Option<f64>,
    pub max_deviation: f64,
}

impl From<RiskConfigSection> for RiskConfig {
    fn from(s: RiskConfigSection) -> Self {
        RiskConfig {
            account_balance: s.account_balance,
            max_position_size: s.max_position_size,
            reference_price: s.reference_price,
            max_deviation: s.max_deviation,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub json_logs: bool,
    pub event_loop: EventLoopConfig,
    pub market_data: MarketDataSection,
    pub bridge: BridgeConfig,
    pub broadcaster: BroadcasterConfig,
    pub persistence: PersistenceConfig,
    pub risk: RiskConfigSection,
    pub circuit_breaker: CircuitBreakerConfigSection,
    pub rate_limiter: RateLimiterSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            event_loop: EventLoopConfig::default(),
            market_data: MarketDataSection::default(),
            bridge: BridgeConfig::default(),
            broadcaster: BroadcasterConfig::default(),
            persistence: PersistenceConfig::default(),
            risk: RiskConfigSection::default(),
            circuit_breaker: CircuitBreakerConfigSection::default(),
            rate_limiter: RateLimiterSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketDataSection {
    pub book_buffer_cap: usize,
    pub resync_window_ns: i64,
    pub resync_alert_threshold: usize,
}

impl Default for MarketDataSection {
    fn default() -> Self {
        let d = MarketDataConfig::default();
        Self {
            book_buffer_cap: d.book_buffer_cap,
            resync_window_ns: d.resync_window_ns,
            resync_alert_threshold: d.resync_alert_threshold,
        }
    }
}

impl From<MarketDataSection> for MarketDataConfig {
    fn from(s: MarketDataSection) -> Self {
        MarketDataConfig {
            book_buffer_cap: s.book_buffer_cap,
            resync_window_ns: s.resync_window_ns,
            resync_alert_threshold: s.resync_alert_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigSection {
    pub failure_threshold: u64,
    pub timeout_secs: u64,
    pub success_threshold: u64,
}

impl Default for CircuitBreakerConfigSection {
    fn default() -> Self {
        let d = CircuitBreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            timeout_secs: d.timeout.as_secs(),
            success_threshold: d.success_threshold,
        }
    }
}

impl From<CircuitBreakerConfigSection> for CircuitBreakerConfig {
    fn from(s: CircuitBreakerConfigSection) -> Self {
        CircuitBreakerConfig {
            failure_threshold: s.failure_threshold,
            timeout: Duration::from_secs(s.timeout_secs),
            success_threshold: s.success_threshold,
        }
    }
}

impl Config {
    /// Parses `raw` as TOML with no environment overrides. Used for tests
    /// and for callers that already resolved overrides themselves.
    pub fn load_from_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError(e.to_string()))
    }

    /// Layers `raw` TOML under `VELOZ_`-prefixed environment variables
    /// (`__` separates nested keys, e.g. `VELOZ_RISK__MAX_POSITION_SIZE`),
    /// the layering order used everywhere else this engine reads config.
    pub fn load_with_env_overrides(raw: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix("VELOZ").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_loop.worker_count == 0 {
            return Err(ConfigError("event_loop.worker_count must be > 0".to_string()));
        }
        if self.bridge.queue_capacity == 0 {
            return Err(ConfigError("bridge.queue_capacity must be > 0".to_string()));
        }
        if self.broadcaster.ring_cap == 0 {
            return Err(ConfigError("broadcaster.ring_cap must be > 0".to_string()));
        }
        if self.persistence.max_snapshots == 0 {
            return Err(ConfigError("persistence.max_snapshots must be > 0".to_string()));
        }
        if self.risk.max_deviation < 0.0 {
            return Err(ConfigError("risk.max_deviation must be >= 0".to_string()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError("circuit_breaker.failure_threshold must be > 0".to_string()));
        }
        if self.rate_limiter.capacity == 0 {
            return Err(ConfigError("rate_limiter.capacity must be > 0".to_string()));
        }
        if self.rate_limiter.refill_rate <= 0.0 {
            return Err(ConfigError("rate_limiter.refill_rate must be > 0".to_string()));
        }
        Ok(())
    }
}
