//! Entry and close planning.
//!
//! Pure sizing and fee arithmetic: no IO, no state mutation. An entry that
//! fails any check returns `None` with the rejection logged; planning a close
//! always succeeds.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::config::{FeeConfig, LiveCapsConfig};
use crate::domain::{Decision, Liquidity, Position, Side};

/// Minimum gross-reward-to-total-fee ratio for an entry to be worth paying
/// fees on.
pub const MIN_REWARD_FEE_RATIO: Decimal = dec!(3);
/// Minimum theoretical gross reward in USD; below this the move is too small
/// to bother trading.
pub const MIN_EXPECTED_REWARD_USD: Decimal = dec!(1);

const DEFAULT_LEVERAGE: Decimal = dec!(10);
const DEFAULT_RISK_FRACTION: Decimal = dec!(0.01);

/// 若 AI 的文字理由与 entry 信号自相矛盾，直接放弃这笔交易。
const CONTRADICTION_PHRASES: [&str; 6] = [
    "no entry",
    "no long entry",
    "no short entry",
    "do not enter",
    "avoid entry",
    "skip entry",
];

/// Computed entry plan with position sizing and fees.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub side: Side,
    pub leverage: Decimal,
    pub stop_loss_price: Decimal,
    pub profit_target_price: Decimal,
    pub risk_usd: Decimal,
    pub quantity: Decimal,
    pub position_value: Decimal,
    pub margin_required: Decimal,
    pub liquidity: Liquidity,
    pub fee_rate: Decimal,
    pub entry_fee: Decimal,
    pub total_cost: Decimal,
    pub raw_reason: String,
}

/// Computed close plan with PnL and fee breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosePlan {
    pub raw_reason: String,
    pub reason_text: String,
    pub pnl: Decimal,
    pub fee_rate: Decimal,
    pub exit_fee: Decimal,
    pub total_fees: Decimal,
    pub net_pnl: Decimal,
}

fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute position sizing, margin, and fee parameters for an entry.
///
/// Live caps are applied only when a live backend is configured. The margin
/// cap rescale shrinks `risk_usd` downward only; it never inflates risk.
#[allow(clippy::too_many_arguments)]
pub fn compute_entry_plan(
    coin: &str,
    decision: &Decision,
    current_price: Decimal,
    balance: Decimal,
    is_live_backend: bool,
    live_caps: &LiveCapsConfig,
    fees: &FeeConfig,
) -> Option<EntryPlan> {
    let side = decision.side;
    let raw_reason = decision.justification.trim().to_string();
    let reason_compact = compact_whitespace(&raw_reason);
    if !reason_compact.is_empty() {
        let reason_lower = reason_compact.to_lowercase();
        if CONTRADICTION_PHRASES
            .iter()
            .any(|phrase| reason_lower.contains(phrase))
        {
            warn!(
                coin,
                reason = %reason_compact,
                "skipping entry because justification contradicts signal"
            );
            return None;
        }
    }

    let mut leverage = decision.leverage.unwrap_or(DEFAULT_LEVERAGE);
    if leverage <= Decimal::ZERO {
        warn!(coin, leverage = %leverage, "non-positive leverage; defaulting to 1x");
        leverage = Decimal::ONE;
    }

    let mut risk_usd = decision
        .risk_usd
        .unwrap_or(balance * DEFAULT_RISK_FRACTION);

    if is_live_backend {
        if live_caps.max_leverage > Decimal::ZERO && leverage > live_caps.max_leverage {
            leverage = live_caps.max_leverage;
        }
        if live_caps.max_risk_usd > Decimal::ZERO && risk_usd > live_caps.max_risk_usd {
            risk_usd = live_caps.max_risk_usd;
        }
    }

    let (Some(stop_loss_price), Some(profit_target_price)) =
        (decision.stop_loss, decision.profit_target)
    else {
        warn!(coin, "missing stop loss or profit target in decision; skipping entry");
        return None;
    };

    if stop_loss_price <= Decimal::ZERO || profit_target_price <= Decimal::ZERO {
        warn!(
            coin,
            stop_loss = %stop_loss_price,
            profit_target = %profit_target_price,
            "non-positive stop loss or profit target; skipping entry"
        );
        return None;
    }

    match side {
        Side::Long => {
            if stop_loss_price >= current_price {
                warn!(
                    coin,
                    stop_loss = %stop_loss_price,
                    price = %current_price,
                    "stop loss not below current price for long; skipping entry"
                );
                return None;
            }
            if profit_target_price <= current_price {
                warn!(
                    coin,
                    profit_target = %profit_target_price,
                    price = %current_price,
                    "profit target not above current price for long; skipping entry"
                );
                return None;
            }
        }
        Side::Short => {
            if stop_loss_price <= current_price {
                warn!(
                    coin,
                    stop_loss = %stop_loss_price,
                    price = %current_price,
                    "stop loss not above current price for short; skipping entry"
                );
                return None;
            }
            if profit_target_price >= current_price {
                warn!(
                    coin,
                    profit_target = %profit_target_price,
                    price = %current_price,
                    "profit target not below current price for short; skipping entry"
                );
                return None;
            }
        }
    }

    let stop_distance = (current_price - stop_loss_price).abs();
    if stop_distance == Decimal::ZERO {
        warn!(coin, "zero stop distance; skipping entry");
        return None;
    }

    let mut quantity = risk_usd / stop_distance;
    let mut position_value = quantity * current_price;
    let mut margin_required = position_value / leverage;

    if is_live_backend
        && live_caps.max_margin_usd > Decimal::ZERO
        && margin_required > live_caps.max_margin_usd
    {
        info!(
            coin,
            margin = %margin_required,
            cap = %live_caps.max_margin_usd,
            "margin exceeds live margin cap; scaling position down"
        );
        margin_required = live_caps.max_margin_usd;
        position_value = margin_required * leverage;
        quantity = position_value / current_price;
        let effective_risk_usd = quantity * stop_distance;
        if effective_risk_usd < risk_usd {
            risk_usd = effective_risk_usd;
        }
    }

    let liquidity = decision.liquidity;
    let fee_rate = decision.fee_rate.unwrap_or_else(|| fees.rate_for(liquidity));
    let entry_fee = position_value * fee_rate;

    // Worthwhileness filter: theoretical gross reward vs estimated round-trip
    // fees (exit fee assumed similar to entry fee).
    let reward_distance = (profit_target_price - current_price).abs();
    let expected_gross_reward = quantity * reward_distance;
    let total_fees_est = entry_fee * dec!(2);

    if expected_gross_reward < MIN_EXPECTED_REWARD_USD {
        info!(
            coin,
            expected_reward = %expected_gross_reward,
            minimum = %MIN_EXPECTED_REWARD_USD,
            "expected gross reward too small; skipping entry"
        );
        return None;
    }

    if total_fees_est > Decimal::ZERO
        && expected_gross_reward / total_fees_est < MIN_REWARD_FEE_RATIO
    {
        info!(
            coin,
            ratio = %(expected_gross_reward / total_fees_est),
            minimum = %MIN_REWARD_FEE_RATIO,
            "reward/fee ratio too low; skipping entry"
        );
        return None;
    }

    let total_cost = margin_required + entry_fee;
    if total_cost > balance {
        warn!(
            coin,
            balance = %balance,
            margin = %margin_required,
            fees = %entry_fee,
            "insufficient balance for margin and fees"
        );
        return None;
    }

    Some(EntryPlan {
        side,
        leverage,
        stop_loss_price,
        profit_target_price,
        risk_usd,
        quantity,
        position_value,
        margin_required,
        liquidity,
        fee_rate,
        entry_fee,
        total_cost,
        raw_reason,
    })
}

/// Compute realized PnL and the fee breakdown for closing `position` at
/// `current_price`. Infallible: a close always has a plan.
pub fn compute_close_plan(
    decision: &Decision,
    current_price: Decimal,
    position: &Position,
    pnl: Decimal,
    default_fee_rate: Decimal,
) -> ClosePlan {
    let raw_reason = decision.justification.trim().to_string();
    let base_reason = if !raw_reason.is_empty() {
        raw_reason.clone()
    } else if !position.last_justification.is_empty() {
        position.last_justification.clone()
    } else {
        "AI close signal".to_string()
    };
    let reason_text = compact_whitespace(&base_reason);

    // A zero rate on a taker position means the field predates fee tracking
    // in the state file; maker positions legitimately carry zero.
    let fee_rate = if position.fee_rate == Decimal::ZERO
        && position.liquidity == Liquidity::Taker
    {
        default_fee_rate
    } else {
        position.fee_rate
    };
    let exit_fee = position.quantity * current_price * fee_rate;
    let total_fees = position.fees_paid + exit_fee;
    let net_pnl = pnl - total_fees;

    ClosePlan {
        raw_reason,
        reason_text,
        pnl,
        fee_rate,
        exit_fee,
        total_fees,
        net_pnl,
    }
}
