use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::decision::{Liquidity, Side};
use crate::exchange::TradingBackend;

/// An open perpetual-futures position, one per coin.
///
/// Created on entry, mutated on hold/SL-TP checks, removed on close. The
/// executor is the single owner; nothing else mutates the position map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub profit_target: Decimal,
    pub leverage: Decimal,
    pub margin: Decimal,
    pub fees_paid: Decimal,
    pub fee_rate: Decimal,
    pub liquidity: Liquidity,
    pub risk_usd: Decimal,
    /// Backend that holds the live order legs, if any. `None` in paper mode.
    #[serde(default)]
    pub live_backend: Option<TradingBackend>,
    #[serde(default)]
    pub entry_oid: Option<String>,
    #[serde(default)]
    pub tp_oid: Option<String>,
    #[serde(default)]
    pub sl_oid: Option<String>,
    #[serde(default)]
    pub entry_justification: String,
    /// Most recent model justification, refreshed on hold signals.
    #[serde(default)]
    pub last_justification: String,
}

impl Position {
    /// Gross (pre-fee) PnL if the position were marked at `price`.
    pub fn gross_pnl_at(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// Notional value at `price`.
    pub fn notional_at(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Estimated fee for exiting the full position at `price`.
    pub fn estimated_exit_fee(&self, price: Decimal) -> Decimal {
        self.notional_at(price) * self.fee_rate
    }

    /// Reward-to-risk display ratio from gross PnL at target vs. at stop.
    /// Returns `None` when the stop carries no downside (ratio undefined).
    pub fn reward_risk_display(&self) -> Option<String> {
        let reward = self.gross_pnl_at(self.profit_target).max(Decimal::ZERO);
        let risk = (-self.gross_pnl_at(self.stop_loss)).max(Decimal::ZERO);
        if risk > Decimal::ZERO {
            let ratio = if reward > Decimal::ZERO {
                reward / risk
            } else {
                Decimal::ZERO
            };
            Some(format!("{:.2}:1", ratio))
        } else {
            None
        }
    }
}

/// Standardized account snapshot returned by exchange clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub total_equity: Decimal,
    pub total_margin: Decimal,
    pub positions: Vec<ExchangePosition>,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

impl AccountSnapshot {
    pub fn positions_count(&self) -> usize {
        self.positions.len()
    }
}

/// A position as reported by an exchange, normalized across backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub coin: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
    pub leverage: Decimal,
    pub margin: Decimal,
    pub notional: Decimal,
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub liquidation_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position {
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            stop_loss: dec!(49000),
            profit_target: dec!(52000),
            leverage: dec!(10),
            margin: dec!(500),
            fees_paid: dec!(1.375),
            fee_rate: dec!(0.000275),
            liquidity: Liquidity::Taker,
            risk_usd: dec!(100),
            live_backend: None,
            entry_oid: None,
            tp_oid: None,
            sl_oid: None,
            entry_justification: String::new(),
            last_justification: String::new(),
        }
    }

    #[test]
    fn gross_pnl_long() {
        let pos = long_position();
        assert_eq!(pos.gross_pnl_at(dec!(52000)), dec!(200));
        assert_eq!(pos.gross_pnl_at(dec!(49000)), dec!(-100));
    }

    #[test]
    fn gross_pnl_short_mirrors_long() {
        let mut pos = long_position();
        pos.side = Side::Short;
        pos.stop_loss = dec!(52000);
        pos.profit_target = dec!(49000);
        assert_eq!(pos.gross_pnl_at(dec!(49000)), dec!(100));
        assert_eq!(pos.gross_pnl_at(dec!(52000)), dec!(-200));
    }

    #[test]
    fn reward_risk_display_formats_ratio() {
        let pos = long_position();
        // reward 200, risk 100
        assert_eq!(pos.reward_risk_display().unwrap(), "2.00:1");
    }

    #[test]
    fn reward_risk_display_undefined_without_downside() {
        let mut pos = long_position();
        pos.stop_loss = dec!(50000); // stop at entry, zero downside
        assert!(pos.reward_risk_display().is_none());
    }
}
