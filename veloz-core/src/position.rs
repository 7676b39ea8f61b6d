//! Position aggregation (C10, §4.7).

use crate::model::{Position, Side, SymbolId, EPSILON};
use std::collections::HashMap;

impl Position {
    /// Apply one fill, updating weighted average price on same-side
    /// additions or realizing PnL against the current average on an
    /// opposite-side fill. A fill that exceeds the current size flips the
    /// position, opening the residual at the fill price.
    pub fn apply_fill(&mut self, side: Side, qty: f64, price: f64) {
        let fill_sign = side.sign();
        let current_sign = if self.size > EPSILON {
            1.0
        } else if self.size < -EPSILON {
            -1.0
        } else {
            0.0
        };

        if current_sign == 0.0 || current_sign == fill_sign {
            let new_abs = self.size.abs() + qty;
            self.avg_price = (self.size.abs() * self.avg_price + qty * price) / new_abs;
            self.size += fill_sign * qty;
        } else {
            let closing_qty = qty.min(self.size.abs());
            self.realized_pnl += current_sign * (price - self.avg_price) * closing_qty;
            self.size += fill_sign * qty;

            let residual = qty - closing_qty;
            if residual > EPSILON {
                self.avg_price = price;
            }
        }

        if self.size.abs() < EPSILON {
            self.size = 0.0;
            self.avg_price = 0.0;
        }
    }
}

/// Per-symbol position table, owned by `OrderStore` for the engine's
/// lifetime.
#[derive(Default)]
pub struct PositionBook {
    positions: HashMap<SymbolId, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &SymbolId) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn apply_fill(&mut self, symbol: &SymbolId, side: Side, qty: f64, price: f64) -> Position {
        let pos = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::flat(symbol.clone()));
        pos.apply_fill(side, qty, price);
        pos.clone()
    }

    /// Inserts a position as-is, e.g. when reconstructing from a persistence
    /// snapshot. Unlike `apply_fill`, this does not touch `realized_pnl`.
    pub fn restore(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_reduce_realizes_pnl() {
        let mut pos = Position::flat(SymbolId::new("BTCUSDT"));
        pos.apply_fill(Side::Buy, 1.0, 50_000.0);
        pos.apply_fill(Side::Sell, 0.3, 51_000.0);

        assert!((pos.size - 0.7).abs() < 1e-9);
        assert!((pos.avg_price - 50_000.0).abs() < 1e-9);
        assert!((pos.realized_pnl - 300.0).abs() < 1e-9);
    }

    #[test]
    fn opposite_fill_exceeding_size_flips_and_opens_residual() {
        let mut pos = Position::flat(SymbolId::new("BTCUSDT"));
        pos.apply_fill(Side::Buy, 1.0, 100.0);
        pos.apply_fill(Side::Sell, 1.5, 110.0);

        assert!((pos.size - (-0.5)).abs() < 1e-9);
        assert!((pos.avg_price - 110.0).abs() < 1e-9);
        assert!((pos.realized_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn same_side_additions_weight_average() {
        let mut pos = Position::flat(SymbolId::new("ETHUSDT"));
        pos.apply_fill(Side::Buy, 1.0, 100.0);
        pos.apply_fill(Side::Buy, 1.0, 110.0);
        assert!((pos.avg_price - 105.0).abs() < 1e-9);
        assert!((pos.size - 2.0).abs() < 1e-9);
    }

    #[test]
    fn collapsing_to_flat_preserves_realized_pnl() {
        let mut pos = Position::flat(SymbolId::new("BTCUSDT"));
        pos.apply_fill(Side::Buy, 1.0, 100.0);
        pos.apply_fill(Side::Sell, 1.0, 105.0);
        assert!(pos.is_flat());
        assert_eq!(pos.avg_price, 0.0);
        assert!((pos.realized_pnl - 5.0).abs() < 1e-9);
    }

    #[test]
    fn restore_preserves_realized_pnl_unlike_apply_fill() {
        let mut book = PositionBook::new();
        let sym = SymbolId::new("BTCUSDT");
        let snapshotted = Position { symbol: sym.clone(), size: 0.7, avg_price: 50_000.0, realized_pnl: 300.0 };

        book.restore(snapshotted);

        let restored = book.get(&sym).unwrap();
        assert!((restored.size - 0.7).abs() < 1e-9);
        assert!((restored.realized_pnl - 300.0).abs() < 1e-9);
    }
}
