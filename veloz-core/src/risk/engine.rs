//! Sequential, fail-fast pre-trade gate (C12, §4.9).

use crate::error::RiskRejection;
use crate::model::{OrderRequest, OrderType};

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskConfig {
    pub account_balance: f64,
    /// `0.0` disables the check.
    pub max_position_size: f64,
    /// Reference price for the deviation check; `None` disables it.
    pub reference_price: Option<f64>,
    /// Fractional max deviation, e.g. `0.05` for 5%.
    pub max_deviation: f64,
}

/// Runs the three checks of §4.9 in order, failing on the first violation.
/// Market orders (no `price`) skip checks that need one.
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn set_reference_price(&mut self, price: Option<f64>) {
        self.config.reference_price = price;
    }

    pub fn check(&self, request: &OrderRequest) -> Result<(), RiskRejection> {
        if request.order_type != OrderType::Market {
            if let Some(price) = request.price {
                let required = request.qty * price;
                if required > self.config.account_balance {
                    return Err(RiskRejection::InsufficientFunds {
                        required,
                        available: self.config.account_balance,
                    });
                }
            }
        }

        if self.config.max_position_size > 0.0 && request.qty > self.config.max_position_size {
            return Err(RiskRejection::PositionLimit {
                requested: request.qty,
                limit: self.config.max_position_size,
            });
        }

        if request.order_type != OrderType::Market {
            if let (Some(price), Some(reference)) = (request.price, self.config.reference_price) {
                if reference > 0.0 {
                    let deviation = (price - reference).abs() / reference;
                    if deviation > self.config.max_deviation {
                        return Err(RiskRejection::PriceDeviation {
                            price,
                            reference,
                            deviation,
                            limit: self.config.max_deviation,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Side, SymbolId, TimeInForce};

    fn request(qty: f64, price: Option<f64>, order_type: OrderType) -> OrderRequest {
        OrderRequest {
            symbol: SymbolId::new("BTCUSDT"),
            side: Side::Buy,
            order_type,
            qty,
            price,
            tif: TimeInForce::Gtc,
            client_order_id: "cid".to_string(),
        }
    }

    #[test]
    fn rejects_insufficient_funds() {
        let engine = RiskEngine::new(RiskConfig { account_balance: 1000.0, ..Default::default() });
        let err = engine
            .check(&request(1.0, Some(2000.0), OrderType::Limit))
            .unwrap_err();
        assert!(matches!(err, RiskRejection::InsufficientFunds { .. }));
    }

    #[test]
    fn rejects_over_position_limit() {
        let engine = RiskEngine::new(RiskConfig {
            account_balance: 1_000_000.0,
            max_position_size: 1.0,
            ..Default::default()
        });
        let err = engine
            .check(&request(2.0, Some(100.0), OrderType::Limit))
            .unwrap_err();
        assert!(matches!(err, RiskRejection::PositionLimit { .. }));
    }

    #[test]
    fn rejects_price_deviation_beyond_limit() {
        let engine = RiskEngine::new(RiskConfig {
            account_balance: 1_000_000.0,
            reference_price: Some(100.0),
            max_deviation: 0.05,
            ..Default::default()
        });
        let err = engine
            .check(&request(1.0, Some(110.0), OrderType::Limit))
            .unwrap_err();
        assert!(matches!(err, RiskRejection::PriceDeviation { .. }));
    }

    #[test]
    fn market_orders_skip_price_based_checks() {
        let engine = RiskEngine::new(RiskConfig {
            account_balance: 1.0,
            reference_price: Some(100.0),
            max_deviation: 0.01,
            ..Default::default()
        });
        assert!(engine.check(&request(1.0, None, OrderType::Market)).is_ok());
    }

    #[test]
    fn within_limits_is_allowed() {
        let engine = RiskEngine::new(RiskConfig {
            account_balance: 1_000_000.0,
            max_position_size: 10.0,
            reference_price: Some(100.0),
            max_deviation: 0.05,
        });
        assert!(engine.check(&request(1.0, Some(102.0), OrderType::Limit)).is_ok());
    }
}
