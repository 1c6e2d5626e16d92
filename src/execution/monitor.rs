//! Intrabar stop-loss / take-profit sweep.
//!
//! Runs every iteration over all open positions using the current candle's
//! high and low. The stop is always checked before the target, so a candle
//! that sweeps both levels exits at the stop. Skipped entirely when the
//! positions live on Hyperliquid with live trading on: the exchange holds
//! the protective trigger orders there.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::domain::{Position, Side};
use crate::market::MarketSnapshot;

pub const STOP_LOSS_REASON: &str = "Stop loss hit";
pub const TAKE_PROFIT_REASON: &str = "Take profit hit";

/// A breached protective level: close `coin` at `exit_price`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectiveExit {
    pub coin: String,
    pub reason: &'static str,
    /// Pinned to the breached level, not the candle close.
    pub exit_price: Decimal,
}

/// Scan all positions against market snapshots and return the exits to
/// execute. Pure: the caller runs each exit through the normal close path.
pub fn scan_protective_exits(
    positions: &BTreeMap<String, Position>,
    snapshots: &HashMap<String, MarketSnapshot>,
    hyperliquid_is_live: bool,
) -> Vec<ProtectiveExit> {
    if hyperliquid_is_live {
        return Vec::new();
    }

    let mut exits = Vec::new();
    for (coin, position) in positions {
        let Some(snapshot) = snapshots.get(coin) else {
            continue;
        };

        let exit = match position.side {
            Side::Long => {
                if snapshot.low <= position.stop_loss {
                    Some((STOP_LOSS_REASON, position.stop_loss))
                } else if snapshot.high >= position.profit_target {
                    Some((TAKE_PROFIT_REASON, position.profit_target))
                } else {
                    None
                }
            }
            Side::Short => {
                if snapshot.high >= position.stop_loss {
                    Some((STOP_LOSS_REASON, position.stop_loss))
                } else if snapshot.low <= position.profit_target {
                    Some((TAKE_PROFIT_REASON, position.profit_target))
                } else {
                    None
                }
            }
        };

        if let Some((reason, exit_price)) = exit {
            info!(
                coin = %coin,
                side = %position.side,
                reason,
                exit_price = %exit_price,
                "protective level breached"
            );
            exits.push(ProtectiveExit {
                coin: coin.clone(),
                reason,
                exit_price,
            });
        }
    }
    exits
}
