//! Unified trade execution.
//!
//! `TradeExecutor` is the single mutator of the portfolio: every entry,
//! close, hold refresh, and protective exit runs through it, so balance
//! arithmetic and persistence live in exactly one place.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::domain::{Decision, Signal};
use crate::exchange::TradingBackend;
use crate::market::{MarketData, MarketSnapshot};
use crate::risk::check_risk_limits;
use crate::state::TradingState;

use super::monitor::scan_protective_exits;
use super::planner::{compute_close_plan, compute_entry_plan};
use super::router::{position_needs_live_close, route_live_close, route_live_entry};

pub struct TradeExecutor {
    pub state: TradingState,
    config: AppConfig,
    market: Arc<dyn MarketData>,
}

impl TradeExecutor {
    pub fn new(state: TradingState, config: AppConfig, market: Arc<dyn MarketData>) -> Self {
        Self {
            state,
            config,
            market,
        }
    }

    /// Runtime override from the `RISK_CONTROL_ENABLED` env flag, applied
    /// each iteration before decisions are processed.
    pub fn set_risk_control_enabled(&mut self, enabled: bool) {
        self.config.risk.enabled = enabled;
    }

    pub fn risk_control_enabled(&self) -> bool {
        self.config.risk.enabled
    }

    pub fn risk_config(&self) -> &crate::config::RiskConfig {
        &self.config.risk
    }

    fn hyperliquid_is_live(&self) -> bool {
        matches!(
            self.config.trading.backend_kind(),
            Some(TradingBackend::Hyperliquid)
        ) && self.config.hyperliquid.live_trading
    }

    /// Open a position for `coin` at `current_price`.
    ///
    /// The kill-switch check here is a final guard: the iteration loop
    /// already gates entries, but a blocked entry must stay blocked even if
    /// a caller forgets.
    pub async fn execute_entry(&mut self, coin: &str, decision: &Decision, current_price: Decimal) {
        if !check_risk_limits(&self.state.risk_control, self.config.risk.enabled) {
            warn!(
                coin,
                price = %current_price,
                "kill-switch active (executor guard); blocking entry"
            );
            return;
        }

        if self.state.positions.contains_key(coin) {
            warn!(coin, "already have position, skipping entry");
            return;
        }

        let balance = self.state.balance;
        let Some(plan) = compute_entry_plan(
            coin,
            decision,
            current_price,
            balance,
            self.config.is_live_backend(),
            &self.config.live,
            &self.config.fees,
        ) else {
            return;
        };

        // Live backends must confirm the order before local state moves. A
        // routing failure aborts the entry entirely.
        let mut live_fill = None;
        if self.config.is_live_backend() {
            match route_live_entry(coin, &plan, current_price, &self.config).await {
                Some(fill) => live_fill = Some(fill),
                None => return,
            }
        }

        let (live_backend, entry_oid, tp_oid, sl_oid) = match live_fill {
            Some((result, backend)) => (
                Some(backend),
                result.entry_oid,
                result.tp_oid,
                result.sl_oid,
            ),
            None => (None, None, None, None),
        };

        let position = crate::domain::Position {
            side: plan.side,
            quantity: plan.quantity,
            entry_price: current_price,
            stop_loss: plan.stop_loss_price,
            profit_target: plan.profit_target_price,
            leverage: plan.leverage,
            margin: plan.margin_required,
            fees_paid: plan.entry_fee,
            fee_rate: plan.fee_rate,
            liquidity: plan.liquidity,
            risk_usd: plan.risk_usd,
            live_backend,
            entry_oid,
            tp_oid,
            sl_oid,
            entry_justification: plan.raw_reason.clone(),
            last_justification: plan.raw_reason.clone(),
        };

        let rr_display = position
            .reward_risk_display()
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            coin,
            side = %plan.side,
            leverage = %plan.leverage,
            entry_price = %current_price,
            quantity = %plan.quantity,
            margin = %plan.margin_required,
            risk_usd = %plan.risk_usd,
            target = %plan.profit_target_price,
            stop = %plan.stop_loss_price,
            entry_fee = %plan.entry_fee,
            liquidity = %plan.liquidity,
            reward_risk = %rr_display,
            live = live_backend.is_some(),
            "opened position"
        );

        self.state.positions.insert(coin.to_string(), position);
        self.state.balance = balance - plan.total_cost;
        self.state.save();
    }

    /// Close the position for `coin` at `current_price`, returning margin
    /// plus net PnL to the balance.
    pub async fn execute_close(&mut self, coin: &str, decision: &Decision, current_price: Decimal) {
        let Some(position) = self.state.positions.remove(coin) else {
            warn!(coin, "no position to close");
            return;
        };

        let pnl = position.gross_pnl_at(current_price);
        let plan = compute_close_plan(
            decision,
            current_price,
            &position,
            pnl,
            self.config.fees.taker_rate,
        );

        // A live-held position must be flattened on the exchange first; if
        // that fails the local position stays open and is retried next
        // iteration.
        if self.config.is_live_backend() && position_needs_live_close(&position) {
            let routed = route_live_close(
                coin,
                position.side,
                position.quantity,
                current_price,
                &self.config,
            )
            .await;
            if routed.is_none() {
                self.state.positions.insert(coin.to_string(), position);
                return;
            }
        }
        let new_balance = self.state.balance + position.margin + plan.net_pnl;
        info!(
            coin,
            side = %position.side,
            exit_price = %current_price,
            gross_pnl = %plan.pnl,
            exit_fee = %plan.exit_fee,
            total_fees = %plan.total_fees,
            net_pnl = %plan.net_pnl,
            balance = %new_balance,
            reason = %plan.reason_text,
            "closed position"
        );
        self.state.balance = new_balance;
        self.state.save();
    }

    /// Refresh the stored justification and log the position's standing.
    pub fn process_hold(&mut self, coin: &str, decision: &Decision, current_price: Decimal) {
        let Some(position) = self.state.positions.get_mut(coin) else {
            return;
        };

        let fresh = decision.justification.trim();
        if !fresh.is_empty() {
            position.last_justification = fresh.split_whitespace().collect::<Vec<_>>().join(" ");
        } else if position.last_justification.trim().is_empty() {
            position.last_justification = "No justification provided.".to_string();
        }

        let gross = position.gross_pnl_at(current_price);
        let exit_fee_now = position.estimated_exit_fee(current_price);
        let total_fees_now = position.fees_paid + exit_fee_now;
        let net = gross - total_fees_now;
        let gross_at_target = position.gross_pnl_at(position.profit_target);
        let net_at_target =
            gross_at_target - (position.fees_paid + position.estimated_exit_fee(position.profit_target));
        let gross_at_stop = position.gross_pnl_at(position.stop_loss);
        let net_at_stop =
            gross_at_stop - (position.fees_paid + position.estimated_exit_fee(position.stop_loss));
        let rr_display = position
            .reward_risk_display()
            .unwrap_or_else(|| "n/a".to_string());

        info!(
            coin,
            side = %position.side,
            leverage = %position.leverage,
            quantity = %position.quantity,
            margin = %position.margin,
            target = %position.profit_target,
            stop = %position.stop_loss,
            net_pnl = %net,
            gross_pnl = %gross,
            fees = %total_fees_now,
            net_at_target = %net_at_target,
            net_at_stop = %net_at_stop,
            reward_risk = %rr_display,
            reason = %position.last_justification,
            "holding position"
        );
    }

    /// Dispatch one decision batch across the coin universe.
    ///
    /// Positions in coins outside the universe get no decisions; they are
    /// still covered by the SL/TP sweep.
    pub async fn process_decisions(&mut self, decisions: &HashMap<String, Decision>) {
        let universe = self.config.trading.coins.clone();

        let orphaned: Vec<&String> = self
            .state
            .positions
            .keys()
            .filter(|coin| !universe.contains(coin))
            .collect();
        if !orphaned.is_empty() {
            warn!(
                coins = ?orphaned,
                "positions outside the coin universe receive no decisions; SL/TP still applies"
            );
        }

        for coin in &universe {
            let Some(decision) = decisions.get(coin) else {
                continue;
            };

            let snapshot = match self.market.snapshot(coin).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(coin, error = %e, "no market data; skipping decision");
                    continue;
                }
            };

            debug!(
                coin,
                signal = ?decision.signal,
                price = %snapshot.price,
                "processing decision"
            );
            match decision.signal {
                Signal::Entry => self.execute_entry(coin, decision, snapshot.price).await,
                Signal::Close => self.execute_close(coin, decision, snapshot.price).await,
                Signal::Hold => self.process_hold(coin, decision, snapshot.price),
            }
        }
    }

    /// Fetch one candle per open position. The iteration loop fetches this
    /// map once and feeds both the equity mark and the SL/TP sweep from it,
    /// so both see the same candle.
    pub async fn position_snapshots(&self) -> HashMap<String, MarketSnapshot> {
        let mut snapshots = HashMap::new();
        for coin in self.state.positions.keys() {
            match self.market.snapshot(coin).await {
                Ok(snapshot) => {
                    snapshots.insert(coin.clone(), snapshot);
                }
                Err(e) => warn!(coin, error = %e, "no market data for position"),
            }
        }
        snapshots
    }

    /// Intrabar SL/TP sweep over all open positions. Each breach closes the
    /// position at the breached level through the normal close path.
    pub async fn check_stop_loss_take_profit(
        &mut self,
        snapshots: &HashMap<String, MarketSnapshot>,
    ) {
        let exits =
            scan_protective_exits(&self.state.positions, snapshots, self.hyperliquid_is_live());
        for exit in exits {
            let decision = Decision::synthetic_close(exit.reason);
            self.execute_close(&exit.coin, &decision, exit.exit_price)
                .await;
        }
    }
}
