pub mod circuit_breaker;
pub mod engine;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use engine::{RiskConfig, RiskEngine};
