//! Live order routing.
//!
//! Bridges plans to the configured live backend. Every failure mode is a
//! soft `None`: client construction errors, transport errors, and
//! exchange-side rejections all leave the caller's paper state untouched, so
//! the portfolio is never mutated on the strength of an order that may not
//! exist.

use rust_decimal::Decimal;
use tracing::error;

use crate::config::AppConfig;
use crate::domain::{Position, Side};
use crate::exchange::{
    build_exchange_client_for, CloseResult, EntryRequest, EntryResult, ExchangeClient,
    TradingBackend,
};

use super::planner::EntryPlan;

/// The backend a live order should go to, or `None` when the configured
/// backend is paper-only or its live flag is off.
fn live_backend(config: &AppConfig) -> Option<TradingBackend> {
    let backend = config.trading.backend_kind()?;
    let live = match backend {
        TradingBackend::Paper => false,
        TradingBackend::BinanceFutures => config.binance.live,
        TradingBackend::BackpackFutures => config.backpack.live,
        TradingBackend::Hyperliquid => config.hyperliquid.live_trading,
    };
    live.then_some(backend)
}

/// Route a live entry. Returns the successful result together with the
/// backend that filled it, or `None` when no live order was placed.
pub async fn route_live_entry(
    coin: &str,
    plan: &EntryPlan,
    current_price: Decimal,
    config: &AppConfig,
) -> Option<(EntryResult, TradingBackend)> {
    let backend = live_backend(config)?;

    let client = match build_exchange_client_for(backend, config) {
        Ok(client) => client,
        Err(e) => {
            error!(coin, %backend, error = %e, "failed to construct live client; aborting entry");
            return None;
        }
    };

    let request = EntryRequest {
        coin: coin.to_string(),
        side: plan.side,
        size: plan.quantity,
        entry_price: current_price,
        stop_loss_price: plan.stop_loss_price,
        take_profit_price: plan.profit_target_price,
        leverage: plan.leverage,
        liquidity: plan.liquidity,
    };

    let result = match client.place_entry(&request).await {
        Ok(result) => result,
        Err(e) => {
            error!(coin, %backend, error = %e, "live entry request failed");
            return None;
        }
    };

    if !result.success {
        let joined = if result.errors.is_empty() {
            format!("{:?}", result.raw)
        } else {
            result.joined_errors()
        };
        error!(coin, backend = %result.backend, errors = %joined, "live entry failed");
        return None;
    }

    let backend = result.backend;
    Some((result, backend))
}

/// Route a live close. `None` means no live order succeeded and the position
/// must remain open in local state.
pub async fn route_live_close(
    coin: &str,
    side: Side,
    quantity: Decimal,
    current_price: Decimal,
    config: &AppConfig,
) -> Option<CloseResult> {
    let backend = live_backend(config)?;

    let client = match build_exchange_client_for(backend, config) {
        Ok(client) => client,
        Err(e) => {
            error!(
                coin,
                %backend,
                error = %e,
                "failed to construct live client for close; position remains open"
            );
            return None;
        }
    };

    let result = match client
        .close_position(coin, side, Some(quantity), Some(current_price))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(coin, %backend, error = %e, "live close request failed; position remains open");
            return None;
        }
    };

    if !result.success {
        let joined = if result.errors.is_empty() {
            format!("{:?}", result.raw)
        } else {
            result.joined_errors()
        };
        error!(
            coin,
            backend = %result.backend,
            errors = %joined,
            "live close failed; position remains open"
        );
        return None;
    }

    Some(result)
}

/// Whether a position held on a live backend needs a live close.
pub fn position_needs_live_close(position: &Position) -> bool {
    position.live_backend.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::planner::compute_entry_plan;
    use crate::domain::{Decision, Liquidity, Signal};
    use rust_decimal_macros::dec;

    fn plan() -> EntryPlan {
        let decision = Decision {
            signal: Signal::Entry,
            side: Side::Long,
            leverage: Some(dec!(10)),
            risk_usd: Some(dec!(100)),
            stop_loss: Some(dec!(49000)),
            profit_target: Some(dec!(52000)),
            liquidity: Liquidity::Taker,
            fee_rate: None,
            justification: "test".to_string(),
        };
        let config = AppConfig::default();
        compute_entry_plan(
            "BTC",
            &decision,
            dec!(50000),
            dec!(10000),
            false,
            &config.live,
            &config.fees,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn paper_backend_routes_nothing() {
        let config = AppConfig::default();
        assert!(route_live_entry("BTC", &plan(), dec!(50000), &config)
            .await
            .is_none());
        assert!(
            route_live_close("BTC", Side::Long, dec!(0.1), dec!(50000), &config)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn live_backend_with_missing_credentials_routes_nothing() {
        let mut config = AppConfig::default();
        config.trading.backend = "backpack_futures".to_string();
        config.backpack.live = true;
        config.backpack.api_public_key = Some(String::new());
        config.backpack.api_secret_seed = Some(String::new());

        // construction fails on empty credentials and the router absorbs it
        assert!(route_live_entry("BTC", &plan(), dec!(50000), &config)
            .await
            .is_none());
        assert!(
            route_live_close("BTC", Side::Long, dec!(0.1), dec!(50000), &config)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn live_flag_off_means_paper_even_for_live_backends() {
        let mut config = AppConfig::default();
        config.trading.backend = "binance_futures".to_string();
        config.binance.live = false;
        assert!(route_live_entry("BTC", &plan(), dec!(50000), &config)
            .await
            .is_none());
    }
}
